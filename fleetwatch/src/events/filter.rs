use std::fmt;

use url::Url;

use crate::model::Event;

const QUEUE_PARAM: &str = "queue";
const WORKER_PARAM: &str = "worker_id";
const TASK_PARAM: &str = "task_id";

/// Operator filter over the event stream. `queue`, `worker` and `task` terms narrow the stream on
/// the server; remaining text filters buffered events locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub queue: Option<String>,
    pub worker_id: Option<String>,
    pub task_id: Option<String>,
    pub local: String,
}

impl EventFilter {
    /// Parses whitespace-separated terms such as `queue:emails worker=w1 timeout`.
    pub fn parse(input: &str) -> Self {
        let mut filter = Self::default();
        let mut local = Vec::new();

        for token in input.split_whitespace() {
            match split_filter_token(token) {
                Some((key, value)) if key == "queue" => filter.queue = Some(value),
                Some((key, value)) if key == "worker" || key == "worker_id" => filter.worker_id = Some(value),
                Some((key, value)) if key == "task" || key == "task_id" => filter.task_id = Some(value),
                _ => local.push(token),
            }
        }

        filter.local = local.join(" ");
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_none() && self.worker_id.is_none() && self.task_id.is_none() && self.local.is_empty()
    }

    /// Rewrites the stream URL's filter parameters, dropping any stale ones and keeping unrelated
    /// query parameters.
    pub fn events_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let retained: Vec<(String, String)> = base
            .query_pairs()
            .filter(|(k, _)| k != QUEUE_PARAM && k != WORKER_PARAM && k != TASK_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let filters = [
            (QUEUE_PARAM, &self.queue),
            (WORKER_PARAM, &self.worker_id),
            (TASK_PARAM, &self.task_id),
        ];
        let params: Vec<(String, String)> = retained
            .into_iter()
            .chain(
                filters
                    .into_iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone()))),
            )
            .collect();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
        url
    }

    /// Case-insensitive match of the local text against the event's descriptive fields.
    pub fn matches(&self, event: &Event) -> bool {
        let needle = self.local.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        [
            Some(event.message.as_str()),
            Some(event.kind.as_str()),
            Some(event.level.as_str()),
            event.queue.as_deref(),
            event.task_id.as_deref(),
            event.worker_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms = Vec::new();
        if let Some(queue) = &self.queue {
            terms.push(format!("queue:{queue}"));
        }
        if let Some(worker) = &self.worker_id {
            terms.push(format!("worker:{worker}"));
        }
        if let Some(task) = &self.task_id {
            terms.push(format!("task:{task}"));
        }
        if !self.local.is_empty() {
            terms.push(self.local.clone());
        }
        write!(f, "{}", terms.join(" "))
    }
}

/// `key:value` or `key=value`; the separator may be neither first nor last.
fn split_filter_token(token: &str) -> Option<(String, String)> {
    let sep = token.find(|c: char| c == ':' || c == '=')?;
    if sep == 0 || token.len() - 1 <= sep {
        return None;
    }

    let key = token[..sep].trim().to_lowercase();
    let value = token[sep + 1..].trim().to_string();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

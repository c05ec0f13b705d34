mod fixtures;
mod test_engine;
mod test_event_stream;
mod test_probes;
mod test_scrape;

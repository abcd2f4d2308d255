pub mod backend;
pub mod ingestion;
pub mod orchestrator;
pub mod poller;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

//! Scripted transport for engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::TimedEntry;
use crate::transport::{
    FetchResponse, RaceStatus, RaceTransport, SendOutcome, TransportResult,
};

/// In-memory [`RaceTransport`] whose responses are queued up front.
///
/// When a response queue runs dry the call succeeds with a benign default,
/// so tests only script the interesting outcomes.
#[derive(Default)]
pub struct ScriptedTransport {
    pub fetch_responses: Mutex<VecDeque<TransportResult<FetchResponse>>>,
    pub send_responses: Mutex<VecDeque<TransportResult<SendOutcome>>>,
    pub delete_responses: Mutex<VecDeque<TransportResult<()>>>,
    pub sent_entries: Mutex<Vec<TimedEntry>>,
    pub deleted_entry_ids: Mutex<Vec<String>>,
    pub fetch_calls: Mutex<u32>,
}

impl ScriptedTransport {
    pub fn queue_fetch(&self, response: TransportResult<FetchResponse>) {
        self.fetch_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_send(&self, response: TransportResult<SendOutcome>) {
        self.send_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_delete(&self, response: TransportResult<()>) {
        self.delete_responses.lock().unwrap().push_back(response);
    }

    pub fn sent_count(&self) -> usize {
        self.sent_entries.lock().unwrap().len()
    }
}

impl RaceTransport for ScriptedTransport {
    async fn fetch_entries(
        &self,
        _race_id: &str,
        _device_id: &str,
        _device_name: &str,
    ) -> TransportResult<FetchResponse> {
        *self.fetch_calls.lock().unwrap() += 1;
        self.fetch_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchResponse::default()))
    }

    async fn send_entry(
        &self,
        _race_id: &str,
        entry: &TimedEntry,
    ) -> TransportResult<SendOutcome> {
        let response = self
            .send_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SendOutcome {
                    ok: true,
                    photo_skipped: false,
                })
            });
        if response.is_ok() {
            self.sent_entries.lock().unwrap().push(entry.clone());
        }
        response
    }

    async fn delete_entry(
        &self,
        _race_id: &str,
        entry_id: &str,
        _device_id: &str,
    ) -> TransportResult<()> {
        let response = self
            .delete_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if response.is_ok() {
            self.deleted_entry_ids
                .lock()
                .unwrap()
                .push(entry_id.to_string());
        }
        response
    }

    async fn check_race_exists(&self, _race_id: &str) -> TransportResult<RaceStatus> {
        Ok(RaceStatus {
            exists: true,
            entry_count: 0,
        })
    }
}

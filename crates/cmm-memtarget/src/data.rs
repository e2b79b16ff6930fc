//! In-memory data-object store.

use std::collections::HashSet;

use async_trait::async_trait;
use cmm_proto::{DestroyObjectsReq, DestroyObjectsRsp};
use cmm_stubs::IDataObjectStub;
use cmm_types::{make_error_msg, status_code_t, DataObjectCode, Fid, Result};
use parking_lot::Mutex;

/// Records destroyed data objects and fails on demand.
#[derive(Default)]
pub struct MemDataObjectStore {
    destroyed: Mutex<HashSet<(u32, u64)>>,
    requests: Mutex<Vec<Fid>>,
    fail_next: Mutex<Option<status_code_t>>,
}

impl MemDataObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next destroy with `code`.
    pub fn fail_next(&self, code: status_code_t) {
        *self.fail_next.lock() = Some(code);
    }

    /// Files whose objects were asked to be destroyed, in request order.
    pub fn requests(&self) -> Vec<Fid> {
        self.requests.lock().clone()
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed.lock().len()
    }
}

#[async_trait]
impl IDataObjectStub for MemDataObjectStore {
    async fn destroy(&self, req: DestroyObjectsReq) -> Result<DestroyObjectsRsp> {
        self.requests.lock().push(req.fid);
        if let Some(code) = self.fail_next.lock().take() {
            return make_error_msg(code, format!("destroy of {} failed", req.fid));
        }
        if !req.layout.is_valid() {
            return make_error_msg(DataObjectCode::OBJECT_NOT_FOUND, "empty layout");
        }
        let mut destroyed = self.destroyed.lock();
        let count = req
            .layout
            .stripes
            .iter()
            .filter(|s| destroyed.insert((s.ost_index, s.object_id)))
            .count();
        Ok(DestroyObjectsRsp {
            destroyed: count as u32,
        })
    }
}

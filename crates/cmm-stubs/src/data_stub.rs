use async_trait::async_trait;
use cmm_proto::{DestroyObjectsReq, DestroyObjectsRsp};
use cmm_types::Result;
use parking_lot::Mutex;

/// Data-object store, used only to destroy the objects of a file whose last
/// link went away.
#[async_trait]
pub trait IDataObjectStub: Send + Sync {
    async fn destroy(&self, req: DestroyObjectsReq) -> Result<DestroyObjectsRsp>;
}

type DestroyHandler = Box<dyn Fn(&DestroyObjectsReq) -> Result<DestroyObjectsRsp> + Send + Sync>;

/// Records every destroy request; succeeds unless a handler says otherwise.
#[derive(Default)]
pub struct MockDataObjectStub {
    handler: Mutex<Option<DestroyHandler>>,
    requests: Mutex<Vec<DestroyObjectsReq>>,
}

impl MockDataObjectStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_destroy(
        &self,
        f: impl Fn(&DestroyObjectsReq) -> Result<DestroyObjectsRsp> + Send + Sync + 'static,
    ) {
        *self.handler.lock() = Some(Box::new(f));
    }

    pub fn requests(&self) -> Vec<DestroyObjectsReq> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl IDataObjectStub for MockDataObjectStub {
    async fn destroy(&self, req: DestroyObjectsReq) -> Result<DestroyObjectsRsp> {
        self.requests.lock().push(req.clone());
        match self.handler.lock().as_ref() {
            Some(f) => f(&req),
            None => Ok(DestroyObjectsRsp {
                destroyed: req.layout.stripes.len() as u32,
            }),
        }
    }
}

//! Metadata target stub trait, connector trait and mocks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cmm_proto::{
    CreateReq, CreateRsp, GetAttrReq, GetAttrRsp, LinkReq, LinkRsp, LookupReq, LookupRsp,
    MaxSizeReq, MaxSizeRsp, RenameReq, RenameRsp, RootGetReq, RootGetRsp, StatFsReq, StatFsRsp,
    UnlinkReq, UnlinkRsp,
};
use cmm_types::{make_error_msg, Result, StatusCode, TargetIndex};
use parking_lot::Mutex;

/// Client-side handle to one metadata target.
#[async_trait]
pub trait ITargetStub: Send + Sync {
    async fn lookup(&self, req: LookupReq) -> Result<LookupRsp>;
    async fn getattr(&self, req: GetAttrReq) -> Result<GetAttrRsp>;
    async fn create(&self, req: CreateReq) -> Result<CreateRsp>;
    async fn mkdir(&self, req: CreateReq) -> Result<CreateRsp>;
    async fn link(&self, req: LinkReq) -> Result<LinkRsp>;
    async fn unlink(&self, req: UnlinkReq) -> Result<UnlinkRsp>;
    async fn rmdir(&self, req: UnlinkReq) -> Result<UnlinkRsp>;
    async fn rename(&self, req: RenameReq) -> Result<RenameRsp>;
    async fn statfs(&self, req: StatFsReq) -> Result<StatFsRsp>;
    async fn get_maxsize(&self, req: MaxSizeReq) -> Result<MaxSizeRsp>;
    async fn root_get(&self, req: RootGetReq) -> Result<RootGetRsp>;
}

/// Builds and tears down target connections ("devices").
#[async_trait]
pub trait ITargetConnector: Send + Sync {
    async fn connect(&self, index: TargetIndex, info: &str) -> Result<Arc<dyn ITargetStub>>;
    async fn disconnect(&self, index: TargetIndex, stub: Arc<dyn ITargetStub>);
}

// ---------------------------------------------------------------------------
// Mock target
// ---------------------------------------------------------------------------

type Handler<Req, Rsp> = Box<dyn Fn(Req) -> Result<Rsp> + Send + Sync>;

/// Configurable mock for [`ITargetStub`].
///
/// Namespace operations without an installed handler fail with
/// `NotImplemented`; the target-wide queries answer with defaults. Every
/// call is counted by method name.
#[derive(Default)]
pub struct MockTargetStub {
    lookup_handler: Mutex<Option<Handler<LookupReq, LookupRsp>>>,
    getattr_handler: Mutex<Option<Handler<GetAttrReq, GetAttrRsp>>>,
    create_handler: Mutex<Option<Handler<CreateReq, CreateRsp>>>,
    mkdir_handler: Mutex<Option<Handler<CreateReq, CreateRsp>>>,
    link_handler: Mutex<Option<Handler<LinkReq, LinkRsp>>>,
    unlink_handler: Mutex<Option<Handler<UnlinkReq, UnlinkRsp>>>,
    rmdir_handler: Mutex<Option<Handler<UnlinkReq, UnlinkRsp>>>,
    rename_handler: Mutex<Option<Handler<RenameReq, RenameRsp>>>,
    statfs_handler: Mutex<Option<Handler<StatFsReq, StatFsRsp>>>,
    root_get_handler: Mutex<Option<Handler<RootGetReq, RootGetRsp>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockTargetStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_insert(0) += 1;
    }

    pub fn on_lookup(&self, f: impl Fn(LookupReq) -> Result<LookupRsp> + Send + Sync + 'static) {
        *self.lookup_handler.lock() = Some(Box::new(f));
    }

    pub fn on_getattr(
        &self,
        f: impl Fn(GetAttrReq) -> Result<GetAttrRsp> + Send + Sync + 'static,
    ) {
        *self.getattr_handler.lock() = Some(Box::new(f));
    }

    pub fn on_create(&self, f: impl Fn(CreateReq) -> Result<CreateRsp> + Send + Sync + 'static) {
        *self.create_handler.lock() = Some(Box::new(f));
    }

    pub fn on_mkdir(&self, f: impl Fn(CreateReq) -> Result<CreateRsp> + Send + Sync + 'static) {
        *self.mkdir_handler.lock() = Some(Box::new(f));
    }

    pub fn on_link(&self, f: impl Fn(LinkReq) -> Result<LinkRsp> + Send + Sync + 'static) {
        *self.link_handler.lock() = Some(Box::new(f));
    }

    pub fn on_unlink(&self, f: impl Fn(UnlinkReq) -> Result<UnlinkRsp> + Send + Sync + 'static) {
        *self.unlink_handler.lock() = Some(Box::new(f));
    }

    pub fn on_rmdir(&self, f: impl Fn(UnlinkReq) -> Result<UnlinkRsp> + Send + Sync + 'static) {
        *self.rmdir_handler.lock() = Some(Box::new(f));
    }

    pub fn on_rename(&self, f: impl Fn(RenameReq) -> Result<RenameRsp> + Send + Sync + 'static) {
        *self.rename_handler.lock() = Some(Box::new(f));
    }

    pub fn on_statfs(&self, f: impl Fn(StatFsReq) -> Result<StatFsRsp> + Send + Sync + 'static) {
        *self.statfs_handler.lock() = Some(Box::new(f));
    }

    pub fn on_root_get(
        &self,
        f: impl Fn(RootGetReq) -> Result<RootGetRsp> + Send + Sync + 'static,
    ) {
        *self.root_get_handler.lock() = Some(Box::new(f));
    }
}

fn unhandled<T>(method: &str) -> Result<T> {
    make_error_msg(
        StatusCode::NOT_IMPLEMENTED,
        format!("mock target has no {} handler", method),
    )
}

#[async_trait]
impl ITargetStub for MockTargetStub {
    async fn lookup(&self, req: LookupReq) -> Result<LookupRsp> {
        self.record("lookup");
        match self.lookup_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("lookup"),
        }
    }

    async fn getattr(&self, req: GetAttrReq) -> Result<GetAttrRsp> {
        self.record("getattr");
        match self.getattr_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("getattr"),
        }
    }

    async fn create(&self, req: CreateReq) -> Result<CreateRsp> {
        self.record("create");
        match self.create_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("create"),
        }
    }

    async fn mkdir(&self, req: CreateReq) -> Result<CreateRsp> {
        self.record("mkdir");
        match self.mkdir_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("mkdir"),
        }
    }

    async fn link(&self, req: LinkReq) -> Result<LinkRsp> {
        self.record("link");
        match self.link_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("link"),
        }
    }

    async fn unlink(&self, req: UnlinkReq) -> Result<UnlinkRsp> {
        self.record("unlink");
        match self.unlink_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("unlink"),
        }
    }

    async fn rmdir(&self, req: UnlinkReq) -> Result<UnlinkRsp> {
        self.record("rmdir");
        match self.rmdir_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("rmdir"),
        }
    }

    async fn rename(&self, req: RenameReq) -> Result<RenameRsp> {
        self.record("rename");
        match self.rename_handler.lock().as_ref() {
            Some(f) => f(req),
            None => unhandled("rename"),
        }
    }

    async fn statfs(&self, req: StatFsReq) -> Result<StatFsRsp> {
        self.record("statfs");
        match self.statfs_handler.lock().as_ref() {
            Some(f) => f(req),
            None => Ok(StatFsRsp::default()),
        }
    }

    async fn get_maxsize(&self, _req: MaxSizeReq) -> Result<MaxSizeRsp> {
        self.record("get_maxsize");
        Ok(MaxSizeRsp::default())
    }

    async fn root_get(&self, req: RootGetReq) -> Result<RootGetRsp> {
        self.record("root_get");
        match self.root_get_handler.lock().as_ref() {
            Some(f) => f(req),
            None => Ok(RootGetRsp::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock connector
// ---------------------------------------------------------------------------

/// Hands out pre-registered stubs by index and records teardown.
#[derive(Default)]
pub struct MockTargetConnector {
    stubs: Mutex<HashMap<TargetIndex, Arc<dyn ITargetStub>>>,
    connects: Mutex<Vec<TargetIndex>>,
    disconnects: Mutex<Vec<TargetIndex>>,
    fail_connect: Mutex<Option<cmm_types::status_code_t>>,
}

impl MockTargetConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, index: TargetIndex, stub: Arc<dyn ITargetStub>) {
        self.stubs.lock().insert(index, stub);
    }

    /// Fail the next `connect` with `code`.
    pub fn fail_next_connect(&self, code: cmm_types::status_code_t) {
        *self.fail_connect.lock() = Some(code);
    }

    pub fn connects(&self) -> Vec<TargetIndex> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> Vec<TargetIndex> {
        self.disconnects.lock().clone()
    }
}

#[async_trait]
impl ITargetConnector for MockTargetConnector {
    async fn connect(&self, index: TargetIndex, info: &str) -> Result<Arc<dyn ITargetStub>> {
        self.connects.lock().push(index);
        if let Some(code) = self.fail_connect.lock().take() {
            return make_error_msg(code, format!("connect to {} refused", info));
        }
        let registered = self.stubs.lock().get(&index).cloned();
        match registered {
            Some(stub) => Ok(stub),
            None => Ok(Arc::new(MockTargetStub::new())),
        }
    }

    async fn disconnect(&self, index: TargetIndex, _stub: Arc<dyn ITargetStub>) {
        self.disconnects.lock().push(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_proto::ObjectAttrs;
    use cmm_types::Fid;

    #[tokio::test]
    async fn test_mock_target_handlers_and_counts() {
        let stub = MockTargetStub::new();
        assert!(stub.lookup(LookupReq::default()).await.is_err());

        stub.on_lookup(|req| {
            Ok(LookupRsp {
                fid: Fid::new(1, req.name.len() as u32),
                mode: 0,
                attrs: Some(ObjectAttrs::default()),
            })
        });
        let rsp = stub
            .lookup(LookupReq {
                parent: Fid::new(1, 1),
                name: "abc".into(),
            })
            .await
            .unwrap();
        assert_eq!(rsp.fid, Fid::new(1, 3));
        assert_eq!(stub.call_count("lookup"), 2);
        assert_eq!(stub.call_count("create"), 0);
    }

    #[tokio::test]
    async fn test_mock_connector_records() {
        let connector = MockTargetConnector::new();
        let stub = connector.connect(TargetIndex(2), "mdt2").await.unwrap();
        connector.disconnect(TargetIndex(2), stub).await;
        assert_eq!(connector.connects(), vec![TargetIndex(2)]);
        assert_eq!(connector.disconnects(), vec![TargetIndex(2)]);

        connector.fail_next_connect(cmm_types::RPCCode::CONNECT_FAILED);
        assert!(connector.connect(TargetIndex(3), "mdt3").await.is_err());
        assert!(connector.connect(TargetIndex(3), "mdt3").await.is_ok());
    }
}

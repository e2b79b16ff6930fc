//! Metadata target operations.
//!
//! Operations touching two targets are split into phases; each request
//! names the phase the receiving target must execute.

use cmm_types::{Fid, TargetIndex};
use serde::{Deserialize, Serialize};

use crate::types::*;

// ---- Lookup ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LookupReq {
    pub parent: Fid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRsp {
    pub fid: Fid,
    pub mode: u32,
    /// `None` when the object lives on another target.
    pub attrs: Option<ObjectAttrs>,
}

// ---- GetAttr ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetAttrReq {
    pub fid: Fid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAttrRsp {
    pub attrs: ObjectAttrs,
}

// ---- Create / Mkdir ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CreatePhase {
    /// Entry and object live on the receiving target.
    #[default]
    Local,
    /// Create the object only; its name lives on another target.
    Object,
    /// Insert the name only; the object `ctx.fid2` lives on another target.
    InsertName,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateReq {
    /// `fid1` parent, `fid2` pre-allocated child, `name`, `mode`.
    pub ctx: OpContext,
    pub phase: CreatePhase,
    pub rdev: u32,
    pub symlink_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRsp {
    /// Attributes of the new object; absent for `InsertName`.
    pub attrs: Option<ObjectAttrs>,
    /// Parent times after the insert; absent for `Object`.
    pub parent_times: Option<Times>,
}

// ---- Link ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkPhase {
    #[default]
    Local,
    /// Take an extra reference on `ctx.fid1`, which this target owns.
    AddRef,
    /// Insert `ctx.name -> ctx.fid1` under `ctx.fid2`; the object is remote.
    InsertName { mode: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkReq {
    /// `fid1` source object, `fid2` destination parent, `name` new name.
    pub ctx: OpContext,
    pub phase: LinkPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRsp {
    pub attrs: Option<ObjectAttrs>,
    pub parent_times: Option<Times>,
}

// ---- Unlink / Rmdir ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnlinkPhase {
    /// Remove `ctx.name` under `ctx.fid1`, dropping the object's reference
    /// too when the object is local.
    #[default]
    Local,
    /// Drop one reference on `fid`, which this target owns.
    DropRef { fid: Fid },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnlinkReq {
    pub ctx: OpContext,
    pub phase: UnlinkPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRsp {
    pub fid: Fid,
    pub mode: u32,
    /// Entry removed but the object lives elsewhere; its owner still holds
    /// the reference.
    pub remote_object: bool,
    pub released: Option<DestroyInfo>,
    pub parent_times: Option<Times>,
}

// ---- Rename ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenamePhase {
    /// Both parents live on the receiving target.
    #[default]
    Local,
    /// Remove `ctx.name` under `ctx.fid1`; no reference changes.
    RemoveSource,
    /// Insert `new_name -> fid` under `ctx.fid2`, replacing an existing entry.
    InsertTarget { fid: Fid, mode: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenameReq {
    /// `fid1` source parent, `fid2` destination parent, `name` source name.
    pub ctx: OpContext,
    pub new_name: String,
    pub phase: RenamePhase,
}

/// Entry displaced at the destination of a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacedEntry {
    pub fid: Fid,
    pub mode: u32,
    pub remote_object: bool,
    pub released: Option<DestroyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRsp {
    pub fid: Fid,
    pub mode: u32,
    pub replaced: Option<ReplacedEntry>,
    pub src_parent_times: Option<Times>,
    pub dst_parent_times: Option<Times>,
}

// ---- Target-wide queries ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatFsReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatFsRsp {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaxSizeReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaxSizeRsp {
    pub md_size: u32,
    pub cookie_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootGetReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootGetRsp {
    pub fid: Fid,
}

// ---- Identifier allocation ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocHint {
    /// Target whose sequence ranges the identifier should come from.
    pub target: TargetIndex,
    pub parent: Fid,
}

// ---- Data objects ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyObjectsReq {
    pub fid: Fid,
    pub layout: DataLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DestroyObjectsRsp {
    pub destroyed: u32,
}

//! Pass Declarations & Resource Uses
//!
//! A [`Pass`] declares *which* named resources it touches and *how*; it never
//! states when it runs. Execution order falls out of the producer/consumer
//! edges when the graph is compiled. The edge convention follows
//! `input >> access >> output`: a write consumes one version of a resource
//! and produces a renamed successor version, so later passes can depend on
//! "the resource after that write" by name.

use rustc_hash::FxHashMap;

use crate::gpu::{AttachmentView, BufferId, PassEncoder, TextureId};

/// How a pass touches a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Color attachment write (graphics).
    ColorWrite,
    /// Depth attachment read/write (graphics).
    DepthStencilWrite,
    /// Sampled read in a draw or dispatch.
    Sampled,
    /// Storage-image write from a fragment or compute stage.
    StorageWrite,
    /// Compute-shader write.
    ComputeWrite,
    /// Transfer-stage read (copies, blits).
    TransferRead,
    /// Transfer-stage write (copies, blits).
    TransferWrite,
}

impl Access {
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::ColorWrite
                | Self::DepthStencilWrite
                | Self::StorageWrite
                | Self::ComputeWrite
                | Self::TransferWrite
        )
    }
}

/// One `input >> access >> output` edge declaration.
#[derive(Clone, Debug)]
pub struct ResourceUse {
    pub name: String,
    pub access: Access,
    /// Version produced by this use. Required for writes, absent for reads.
    pub output: Option<String>,
}

impl ResourceUse {
    /// Read-only use of the named resource version.
    #[must_use]
    pub fn read(name: impl Into<String>, access: Access) -> Self {
        debug_assert!(!access.is_write(), "write access requires an output alias");
        Self {
            name: name.into(),
            access,
            output: None,
        }
    }

    /// Write use: consumes `name`, produces version `output`.
    #[must_use]
    pub fn write(name: impl Into<String>, access: Access, output: impl Into<String>) -> Self {
        debug_assert!(access.is_write());
        Self {
            name: name.into(),
            access,
            output: Some(output.into()),
        }
    }
}

/// Closure type recorded by a pass during graph execution.
pub type PassExec<'fr> = Box<dyn FnOnce(&mut PassEncoder, &ResourceMap) + 'fr>;

/// A declared pass: name, resource uses, execute body.
pub struct Pass<'fr> {
    pub name: String,
    pub resources: Vec<ResourceUse>,
    pub(crate) execute: Option<PassExec<'fr>>,
}

impl<'fr> Pass<'fr> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            execute: None,
        }
    }

    #[must_use]
    pub fn reads(mut self, name: impl Into<String>, access: Access) -> Self {
        self.resources.push(ResourceUse::read(name, access));
        self
    }

    #[must_use]
    pub fn writes(
        mut self,
        name: impl Into<String>,
        access: Access,
        output: impl Into<String>,
    ) -> Self {
        self.resources.push(ResourceUse::write(name, access, output));
        self
    }

    #[must_use]
    pub fn execute(mut self, body: impl FnOnce(&mut PassEncoder, &ResourceMap) + 'fr) -> Self {
        self.execute = Some(Box::new(body));
        self
    }
}

// ─── Physical Resolution ──────────────────────────────────────────────────────

/// Physical resource backing one or more virtual resource versions.
#[derive(Clone, Copy, Debug)]
pub enum Physical {
    Texture {
        id: TextureId,
        extent: (u32, u32, u32),
    },
    Buffer(BufferId),
}

/// Resolves virtual resource labels to physical handles during recording.
///
/// Every version label of an alias chain maps to the same physical resource.
/// Lookups of undeclared labels panic — by the time a closure runs, the
/// compiler has already validated the declarations, so a miss here is a
/// mismatch between a pass's declarations and its body.
#[derive(Default)]
pub struct ResourceMap {
    entries: FxHashMap<String, Physical>,
}

impl ResourceMap {
    pub(crate) fn insert(&mut self, label: String, physical: Physical) {
        self.entries.insert(label, physical);
    }

    pub(crate) fn probe(&self, label: &str) -> Physical {
        *self
            .entries
            .get(label)
            .unwrap_or_else(|| panic!("resource {label:?} was never declared"))
    }

    fn texture(&self, label: &str) -> (TextureId, (u32, u32, u32)) {
        match self.entries.get(label) {
            Some(Physical::Texture { id, extent }) => (*id, *extent),
            Some(Physical::Buffer(_)) => panic!("resource {label:?} is a buffer, not an image"),
            None => panic!("resource {label:?} was never declared"),
        }
    }

    /// Full view of an image resource.
    #[must_use]
    pub fn image(&self, label: &str) -> AttachmentView {
        AttachmentView::full(self.texture(label).0)
    }

    /// Single-mip view of an image resource.
    #[must_use]
    pub fn image_mip(&self, label: &str, level: u32) -> AttachmentView {
        AttachmentView::mip(self.texture(label).0, level)
    }

    /// Pixel extent of an image resource.
    #[must_use]
    pub fn extent(&self, label: &str) -> (u32, u32, u32) {
        self.texture(label).1
    }

    #[must_use]
    pub fn buffer(&self, label: &str) -> BufferId {
        match self.entries.get(label) {
            Some(Physical::Buffer(id)) => *id,
            Some(Physical::Texture { .. }) => {
                panic!("resource {label:?} is an image, not a buffer")
            }
            None => panic!("resource {label:?} was never declared"),
        }
    }
}

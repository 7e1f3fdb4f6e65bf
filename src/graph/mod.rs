//! Declarative Pass Graph
//!
//! Passes declare named virtual resources with producer/consumer edges
//! (`input >> access >> output`); the compiler performs a topological sort
//! over the declared edges to derive execution order. Nothing here knows
//! which graphics API executes the result — recording produces a
//! [`RecordedFrame`](crate::gpu::command::RecordedFrame) that any
//! [`RenderDevice`](crate::gpu::RenderDevice) replays.
//!
//! # Ordering rules
//!
//! - A pass reading version `V` runs after `V`'s producer.
//! - A pass writing through `V` (consuming it, producing a successor) runs
//!   after every reader of `V` — the write-after-read hazard is an edge, not
//!   a synchronization afterthought.
//! - Among ready passes, declaration order breaks ties. This is what orders
//!   side-effecting passes with no declared resources (emitter updates)
//!   before the draw passes declared after them.
//!
//! # Failure mode
//!
//! Reading a version no pass produces, producing the same version twice, or
//! declaring a cyclic graph is a programmer error and panics at compile time
//! (of the graph, per frame) rather than being reported as a runtime error.

pub mod pass;

pub use pass::{Access, Pass, Physical, ResourceMap, ResourceUse};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::frame::FrameArena;
use crate::gpu::command::{
    ColorAttachment, DepthAttachment, PassTarget, RecordedFrame, RecordedPass,
};
use crate::gpu::{
    AttachmentView, BufferId, ClearValue, PassEncoder, RenderDevice, TextureDesc, TextureId,
};

// ─── Graph ────────────────────────────────────────────────────────────────────

enum Imported {
    Texture {
        id: TextureId,
        extent: (u32, u32, u32),
        clear: Option<ClearValue>,
    },
    Buffer(BufferId),
}

struct DeclaredImage {
    desc: TextureDesc,
    clear: Option<ClearValue>,
}

/// A frame's pass graph under construction.
pub struct RenderGraph<'fr> {
    passes: Vec<Pass<'fr>>,
    imports: FxHashMap<String, Imported>,
    declared: FxHashMap<String, DeclaredImage>,
}

impl Default for RenderGraph<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'fr> RenderGraph<'fr> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            imports: FxHashMap::default(),
            declared: FxHashMap::default(),
        }
    }

    /// Import an externally owned image under a virtual label.
    pub fn attach_image(&mut self, label: impl Into<String>, id: TextureId, extent: (u32, u32)) {
        self.imports.insert(
            label.into(),
            Imported::Texture {
                id,
                extent: (extent.0, extent.1, 1),
                clear: None,
            },
        );
    }

    /// Import an externally owned image and clear it on first write.
    pub fn attach_image_cleared(
        &mut self,
        label: impl Into<String>,
        id: TextureId,
        extent: (u32, u32),
        clear: ClearValue,
    ) {
        self.imports.insert(
            label.into(),
            Imported::Texture {
                id,
                extent: (extent.0, extent.1, 1),
                clear: Some(clear),
            },
        );
    }

    /// Import an externally owned buffer under a virtual label.
    pub fn attach_buffer(&mut self, label: impl Into<String>, id: BufferId) {
        self.imports.insert(label.into(), Imported::Buffer(id));
    }

    /// Declare a graph-owned transient image, cleared on first write.
    pub fn declare_image(
        &mut self,
        label: impl Into<String>,
        desc: TextureDesc,
        clear: Option<ClearValue>,
    ) {
        self.declared
            .insert(label.into(), DeclaredImage { desc, clear });
    }

    pub fn add_pass(&mut self, pass: Pass<'fr>) {
        self.passes.push(pass);
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    /// Resolve declared edges into an execution order.
    ///
    /// # Panics
    ///
    /// On malformed declarations: a read of a version nothing produces, two
    /// producers for one version, or a dependency cycle.
    #[must_use]
    pub fn compile(self) -> CompiledGraph<'fr> {
        let pass_count = self.passes.len();

        // Version table: who produces each resource version.
        let mut producers: FxHashMap<String, Option<usize>> = FxHashMap::default();
        for label in self.imports.keys() {
            producers.insert(label.clone(), None);
        }
        for label in self.declared.keys() {
            producers.insert(label.clone(), None);
        }
        for (index, pass) in self.passes.iter().enumerate() {
            for resource_use in &pass.resources {
                if let Some(output) = &resource_use.output {
                    let previous = producers.insert(output.clone(), Some(index));
                    assert!(
                        previous.is_none(),
                        "resource version {output:?} is produced twice (pass {:?})",
                        pass.name
                    );
                }
            }
        }

        // Validate reads and collect edges.
        let mut edges: FxHashSet<(usize, usize)> = FxHashSet::default();
        for (index, pass) in self.passes.iter().enumerate() {
            for resource_use in &pass.resources {
                let producer = producers.get(resource_use.name.as_str()).unwrap_or_else(|| {
                    panic!(
                        "pass {:?} references resource {:?} which nothing produces",
                        pass.name, resource_use.name
                    )
                });
                if let Some(producing_pass) = producer {
                    if *producing_pass != index {
                        edges.insert((*producing_pass, index));
                    }
                }
            }
        }

        // Write-after-read: the consumer of a version runs after its readers.
        for (index, pass) in self.passes.iter().enumerate() {
            for resource_use in &pass.resources {
                if !resource_use.access.is_write() {
                    continue;
                }
                for (reader_index, reader) in self.passes.iter().enumerate() {
                    if reader_index == index {
                        continue;
                    }
                    let reads_version = reader
                        .resources
                        .iter()
                        .any(|u| !u.access.is_write() && u.name == resource_use.name);
                    if reads_version {
                        edges.insert((reader_index, index));
                    }
                }
            }
        }

        // Kahn's algorithm; among ready passes the lowest declaration index
        // runs first, which keeps the order deterministic.
        let mut indegree = vec![0usize; pass_count];
        for &(_, to) in &edges {
            indegree[to] += 1;
        }
        let mut emitted = vec![false; pass_count];
        let mut order = Vec::with_capacity(pass_count);
        for _ in 0..pass_count {
            let next = (0..pass_count)
                .find(|&i| !emitted[i] && indegree[i] == 0)
                .unwrap_or_else(|| panic!("pass graph contains a cycle"));
            emitted[next] = true;
            order.push(next);
            for &(from, to) in &edges {
                if from == next {
                    indegree[to] -= 1;
                }
            }
        }

        // Alias chains: every written version shares its input's physical
        // resource.
        let mut alias_parent: FxHashMap<String, String> = FxHashMap::default();
        for pass in &self.passes {
            for resource_use in &pass.resources {
                if let Some(output) = &resource_use.output {
                    alias_parent.insert(output.clone(), resource_use.name.clone());
                }
            }
        }

        CompiledGraph {
            passes: self.passes,
            imports: self.imports,
            declared: self.declared,
            order,
            alias_parent,
        }
    }
}

// ─── Compiled Graph ───────────────────────────────────────────────────────────

/// A graph with a resolved execution order, ready to record.
pub struct CompiledGraph<'fr> {
    passes: Vec<Pass<'fr>>,
    imports: FxHashMap<String, Imported>,
    declared: FxHashMap<String, DeclaredImage>,
    order: Vec<usize>,
    alias_parent: FxHashMap<String, String>,
}

impl CompiledGraph<'_> {
    /// Pass names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.passes[i].name.as_str())
            .collect()
    }

    fn root<'a>(&'a self, label: &'a str) -> &'a str {
        let mut current = label;
        while let Some(parent) = self.alias_parent.get(current) {
            current = parent;
        }
        current
    }

    /// Allocate transient attachments, run every pass body in execution
    /// order, and produce the backend-ready frame.
    #[must_use]
    pub fn record(mut self, device: &dyn RenderDevice, arena: &mut FrameArena) -> RecordedFrame {
        // Physical storage per root label.
        let mut physical: FxHashMap<String, Physical> = FxHashMap::default();
        let mut clears: FxHashMap<String, ClearValue> = FxHashMap::default();
        for (label, import) in &self.imports {
            match import {
                Imported::Texture { id, extent, clear } => {
                    physical.insert(
                        label.clone(),
                        Physical::Texture {
                            id: *id,
                            extent: *extent,
                        },
                    );
                    if let Some(clear) = clear {
                        clears.insert(label.clone(), *clear);
                    }
                }
                Imported::Buffer(id) => {
                    physical.insert(label.clone(), Physical::Buffer(*id));
                }
            }
        }
        for (label, image) in &self.declared {
            let id = arena.alloc_texture(device, &image.desc);
            physical.insert(
                label.clone(),
                Physical::Texture {
                    id,
                    extent: (image.desc.width, image.desc.height, image.desc.depth),
                },
            );
            if let Some(clear) = image.clear {
                clears.insert(label.clone(), clear);
            }
        }

        // Every version label resolves to its root's physical resource.
        let mut resources = ResourceMap::default();
        let mut all_labels: Vec<String> = physical.keys().cloned().collect();
        all_labels.extend(self.alias_parent.keys().cloned());
        for label in all_labels {
            let root = self.root(&label).to_string();
            if let Some(entry) = physical.get(&root) {
                resources.insert(label, *entry);
            }
        }

        let mut written: FxHashSet<String> = FxHashSet::default();
        let mut recorded = Vec::with_capacity(self.order.len());
        let order = std::mem::take(&mut self.order);

        for index in order {
            let name = self.passes[index].name.clone();
            let uses = self.passes[index].resources.clone();
            let body = self.passes[index].execute.take();

            let mut colors = smallvec::SmallVec::new();
            let mut depth = None;
            for resource_use in &uses {
                let root = self.root(&resource_use.name).to_string();
                match resource_use.access {
                    Access::ColorWrite => {
                        let Physical::Texture { id, .. } = resources_lookup(&resources, &root)
                        else {
                            panic!("color attachment {root:?} is not an image")
                        };
                        let first_write = written.insert(root.clone());
                        colors.push(ColorAttachment {
                            view: AttachmentView::mip(id, 0),
                            clear: if first_write { clears.get(&root).copied() } else { None },
                        });
                    }
                    Access::DepthStencilWrite => {
                        let Physical::Texture { id, .. } = resources_lookup(&resources, &root)
                        else {
                            panic!("depth attachment {root:?} is not an image")
                        };
                        let first_write = written.insert(root.clone());
                        let clear = if first_write {
                            match clears.get(&root) {
                                Some(ClearValue::Depth(value)) => Some(*value),
                                _ => None,
                            }
                        } else {
                            None
                        };
                        depth = Some(DepthAttachment {
                            view: AttachmentView::mip(id, 0),
                            clear,
                        });
                    }
                    _ => {
                        if resource_use.access.is_write() {
                            written.insert(root);
                        }
                    }
                }
            }

            let target = if colors.is_empty() && depth.is_none() {
                PassTarget::General
            } else {
                PassTarget::Graphics { colors, depth }
            };

            let mut encoder = PassEncoder::new();
            if let Some(body) = body {
                body(&mut encoder, &resources);
            }
            recorded.push(RecordedPass {
                name,
                target,
                commands: encoder.finish(),
            });
        }

        RecordedFrame { passes: recorded }
    }
}

fn resources_lookup(resources: &ResourceMap, root: &str) -> Physical {
    resources.probe(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;
    use crate::gpu::{TextureDesc, TextureFormat};

    fn image_desc(label: &'static str) -> TextureDesc {
        TextureDesc::attachment(label, 64, 64, TextureFormat::Rgba16Float)
    }

    #[test]
    fn dependency_order_overrides_declaration_order() {
        let mut graph = RenderGraph::new();
        graph.declare_image("a", image_desc("a"), None);
        // Declared first but consumes the producer's output.
        graph.add_pass(
            Pass::new("consumer")
                .reads("a_filled", Access::Sampled)
                .writes("a_filled", Access::ColorWrite, "a_done"),
        );
        graph.add_pass(Pass::new("producer").writes("a", Access::ColorWrite, "a_filled"));

        let compiled = graph.compile();
        assert_eq!(compiled.execution_order(), vec!["producer", "consumer"]);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let mut graph = RenderGraph::new();
        graph.add_pass(Pass::new("first"));
        graph.add_pass(Pass::new("second"));
        graph.add_pass(Pass::new("third"));
        let compiled = graph.compile();
        assert_eq!(compiled.execution_order(), vec!["first", "second", "third"]);
    }

    #[test]
    fn writer_runs_after_readers_of_its_input() {
        let mut graph = RenderGraph::new();
        graph.declare_image("target", image_desc("t"), None);
        graph.declare_image("aux", image_desc("x"), None);
        graph.add_pass(Pass::new("fill").writes("target", Access::ColorWrite, "target_v1"));
        // Overwrites target_v1; declared before the reader below.
        graph.add_pass(
            Pass::new("overwrite").writes("target_v1", Access::ColorWrite, "target_v2"),
        );
        graph.add_pass(
            Pass::new("sample_v1")
                .reads("target_v1", Access::Sampled)
                .writes("aux", Access::ColorWrite, "aux_done"),
        );

        let compiled = graph.compile();
        let order = compiled.execution_order();
        let position = |name: &str| order.iter().position(|&n| n == name).unwrap();
        assert!(position("fill") < position("sample_v1"));
        assert!(
            position("sample_v1") < position("overwrite"),
            "reader of a version must run before the pass that overwrites it"
        );
    }

    #[test]
    #[should_panic(expected = "nothing produces")]
    fn reading_an_unproduced_resource_panics() {
        let mut graph = RenderGraph::new();
        graph.add_pass(Pass::new("bad").reads("ghost", Access::Sampled));
        let _ = graph.compile();
    }

    #[test]
    #[should_panic(expected = "produced twice")]
    fn duplicate_version_producers_panic() {
        let mut graph = RenderGraph::new();
        graph.declare_image("a", image_desc("a"), None);
        graph.add_pass(Pass::new("one").writes("a", Access::ColorWrite, "v"));
        graph.add_pass(Pass::new("two").writes("a", Access::ColorWrite, "v"));
        let _ = graph.compile();
    }

    #[test]
    fn alias_chain_resolves_to_one_physical_texture() {
        let device = HeadlessDevice::new();
        let mut arena = crate::frame::FrameArena::new();

        let mut graph = RenderGraph::new();
        graph.declare_image("img", image_desc("img"), None);
        graph.add_pass(Pass::new("a").writes("img", Access::ColorWrite, "img_a"));
        graph.add_pass(Pass::new("b").writes("img_a", Access::ColorWrite, "img_b").execute(
            |_, resources| {
                assert_eq!(resources.image("img"), resources.image("img_b"));
            },
        ));

        let frame = graph.compile().record(&device, &mut arena);
        assert_eq!(frame.passes.len(), 2);
    }

    #[test]
    fn only_first_writer_clears() {
        let device = HeadlessDevice::new();
        let mut arena = crate::frame::FrameArena::new();

        let mut graph = RenderGraph::new();
        graph.declare_image(
            "img",
            image_desc("img"),
            Some(crate::gpu::ClearValue::Color([0.0; 4])),
        );
        graph.add_pass(Pass::new("a").writes("img", Access::ColorWrite, "img_a"));
        graph.add_pass(Pass::new("b").writes("img_a", Access::ColorWrite, "img_b"));

        let frame = graph.compile().record(&device, &mut arena);
        let clear_flags: Vec<bool> = frame
            .passes
            .iter()
            .map(|p| match &p.target {
                crate::gpu::command::PassTarget::Graphics { colors, .. } => {
                    colors[0].clear.is_some()
                }
                crate::gpu::command::PassTarget::General => false,
            })
            .collect();
        assert_eq!(clear_flags, vec![true, false]);
    }
}

//! Ordering of Containers from their recorded tokens.
//!
//! A [`Sequence`] turns an ordered list of Containers into a dependency graph:
//! read-after-write, write-after-read and write-after-write edges per field,
//! plus boundary-exchange nodes in front of stencil reads that need them.

use std::collections::{BTreeSet, HashMap};

use blockspace_common::{Access, Compute, DataView, Error, FieldUid, Result};

use crate::container::Container;

/// How stencil consumers are laid out in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    /// One node per Container over the standard view.
    #[default]
    Standard,
    /// Expandable stencil consumers become an internal node, which needs no
    /// exchange, and a boundary node that waits for it.
    OverlapInternal,
}

/// Why a node is in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Compute,
    Exchange { field: FieldUid },
}

/// One unit of work in a [`Sequence`].
#[derive(Debug, Clone)]
pub struct Node {
    pub container: Container,
    pub data_view: DataView,
    pub role: NodeRole,
    /// Indices of nodes that must complete first. Always smaller than this
    /// node's own index.
    pub deps: BTreeSet<usize>,
}

#[derive(Default)]
struct FieldState {
    writers: Vec<usize>,
    readers: Vec<usize>,
    exchange: Option<usize>,
}

/// Dependency-ordered Containers ready to run on one stream.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    nodes: Vec<Node>,
}

impl Sequence {
    pub fn build(containers: &[Container], policy: SchedulePolicy) -> Result<Self> {
        let _span = tracing::debug_span!("sequence_build", containers = containers.len()).entered();
        let mut nodes: Vec<Node> = Vec::new();
        let mut fields: HashMap<FieldUid, FieldState> = HashMap::new();

        for container in containers {
            let views: &[DataView] = if policy == SchedulePolicy::OverlapInternal
                && container.kind().is_expandable()
                && container.has_stencil_reads()
            {
                &[DataView::Internal, DataView::Boundary]
            } else {
                &[DataView::Standard]
            };

            let mut created = Vec::with_capacity(views.len());
            for &view in views {
                let mut deps = BTreeSet::new();
                for token in container.tokens() {
                    let state = fields.entry(token.uid()).or_default();
                    deps.extend(state.writers.iter().copied());
                    if token.access() == Access::Write {
                        deps.extend(state.readers.iter().copied());
                    }
                    if token.access() == Access::Read
                        && token.compute() == Compute::Stencil
                        && container.needs_exchange(view)
                    {
                        let exchange = match state.exchange {
                            Some(idx) => idx,
                            None => {
                                let unit = token.exchange().cloned().ok_or_else(|| {
                                    Error::construction_invariant(
                                        "Sequence",
                                        format!(
                                            "stencil token of `{}` in `{}` has no exchange unit",
                                            token.field_name(),
                                            container.name()
                                        ),
                                    )
                                })?;
                                let idx = nodes.len();
                                nodes.push(Node {
                                    container: unit,
                                    data_view: view,
                                    role: NodeRole::Exchange { field: token.uid() },
                                    deps: state.writers.iter().copied().collect(),
                                });
                                state.exchange = Some(idx);
                                state.readers.push(idx);
                                idx
                            }
                        };
                        deps.insert(exchange);
                    }
                }
                let idx = nodes.len();
                nodes.push(Node {
                    container: container.clone(),
                    data_view: view,
                    role: NodeRole::Compute,
                    deps,
                });
                created.push(idx);
            }

            for token in container.tokens() {
                let state = fields.entry(token.uid()).or_default();
                match token.access() {
                    Access::Read => state.readers.extend(created.iter().copied()),
                    Access::Write => {
                        state.writers = created.clone();
                        state.readers.clear();
                        state.exchange = None;
                    }
                }
            }
        }

        tracing::debug!(nodes = nodes.len(), "sequence built");
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Group nodes into levels; nodes within a level have no edges between
    /// them and may run concurrently.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut level_of = vec![0usize; self.nodes.len()];
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            let level = node
                .deps
                .iter()
                .map(|&d| level_of[d] + 1)
                .max()
                .unwrap_or(0);
            level_of[idx] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(idx);
        }
        levels
    }

    /// Run every node in dependency order on `stream`.
    pub fn run(&self, stream: usize) -> Result<()> {
        for level in self.levels() {
            for idx in level {
                let node = &self.nodes[idx];
                if !node.container.kind().is_dispatchable() {
                    continue;
                }
                node.container.run_body(stream, node.data_view)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::container::Body;
    use crate::field::{BoundaryExchange, Loadable};
    use crate::kind::ExecutionKind;
    use blockspace_common::DeviceType;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct F {
        uid: FieldUid,
        name: &'static str,
        log: Log,
    }

    struct LogExchange {
        name: &'static str,
        log: Log,
    }

    impl BoundaryExchange for LogExchange {
        fn exchange(&self, _stream: usize) -> Result<()> {
            self.log.lock().unwrap().push(format!("exchange:{}", self.name));
            Ok(())
        }
    }

    impl Loadable for F {
        type Partition = ();
        type PartitionMut = ();

        fn uid(&self) -> FieldUid {
            self.uid
        }

        fn name(&self) -> &str {
            self.name
        }

        fn partition(&self) -> Self::Partition {}

        fn partition_mut(&self) -> Self::PartitionMut {}

        fn boundary_exchange(&self) -> Option<Arc<dyn BoundaryExchange>> {
            Some(Arc::new(LogExchange {
                name: self.name,
                log: self.log.clone(),
            }))
        }
    }

    fn field(name: &'static str, log: &Log) -> F {
        F {
            uid: FieldUid::new(),
            name,
            log: log.clone(),
        }
    }

    fn map(bk: &Backend, name: &'static str, src: &F, dst: &F, log: &Log) -> Container {
        let log = log.clone();
        Container::factory(bk, name, ExecutionKind::Device, |loader| {
            loader.load(src);
            loader.load_mut(dst);
            Ok(Body::launch(move |_, dv| {
                log.lock().unwrap().push(format!("{name}:{dv}"));
                Ok(())
            }))
        })
        .unwrap()
    }

    fn stencil(bk: &Backend, name: &'static str, src: &F, dst: &F, log: &Log) -> Container {
        let log = log.clone();
        Container::factory(bk, name, ExecutionKind::Device, |loader| {
            loader.load_with(src, Compute::Stencil);
            loader.load_mut(dst);
            Ok(Body::launch(move |_, dv| {
                log.lock().unwrap().push(format!("{name}:{dv}"));
                Ok(())
            }))
        })
        .unwrap()
    }

    #[test]
    fn read_after_write_edge() {
        let bk = Backend::cpu();
        let log = Log::default();
        let (a, b, c) = (field("a", &log), field("b", &log), field("c", &log));
        let first = map(&bk, "first", &a, &b, &log);
        let second = map(&bk, "second", &b, &c, &log);

        let seq = Sequence::build(&[first, second], SchedulePolicy::Standard).unwrap();
        assert_eq!(seq.len(), 2);
        assert!(seq.nodes()[1].deps.contains(&0));
        assert_eq!(seq.levels(), vec![vec![0], vec![1]]);
    }

    #[test]
    fn write_after_read_edge() {
        let bk = Backend::cpu();
        let log = Log::default();
        let (a, b, c) = (field("a", &log), field("b", &log), field("c", &log));
        let reader = map(&bk, "reader", &a, &b, &log);
        let writer = map(&bk, "writer", &c, &a, &log);

        let seq = Sequence::build(&[reader, writer], SchedulePolicy::Standard).unwrap();
        assert!(seq.nodes()[1].deps.contains(&0));
    }

    #[test]
    fn independent_containers_share_a_level() {
        let bk = Backend::cpu();
        let log = Log::default();
        let (a, b, c, d) = (
            field("a", &log),
            field("b", &log),
            field("c", &log),
            field("d", &log),
        );
        let one = map(&bk, "one", &a, &b, &log);
        let two = map(&bk, "two", &c, &d, &log);
        let seq = Sequence::build(&[one, two], SchedulePolicy::Standard).unwrap();
        assert_eq!(seq.levels(), vec![vec![0, 1]]);
    }

    #[test]
    fn standard_single_device_needs_no_exchange() {
        let bk = Backend::cpu();
        let log = Log::default();
        let (a, b) = (field("a", &log), field("b", &log));
        let lap = stencil(&bk, "lap", &a, &b, &log);
        let seq = Sequence::build(&[lap], SchedulePolicy::Standard).unwrap();
        assert_eq!(seq.len(), 1);
        seq.run(0).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["lap:standard".to_string()]);
    }

    #[test]
    fn multi_device_inserts_exchange_before_stencil() {
        let bk = Backend::new(DeviceType::Cpu, vec![0, 1], 1).unwrap();
        let log = Log::default();
        let (a, b, c) = (field("a", &log), field("b", &log), field("c", &log));
        let producer = map(&bk, "producer", &c, &a, &log);
        let lap = stencil(&bk, "lap", &a, &b, &log);

        let seq = Sequence::build(&[producer, lap], SchedulePolicy::Standard).unwrap();
        assert_eq!(seq.len(), 3);
        assert!(matches!(seq.nodes()[1].role, NodeRole::Exchange { .. }));
        assert!(seq.nodes()[1].deps.contains(&0));
        assert!(seq.nodes()[2].deps.contains(&1));

        seq.run(0).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["producer:standard", "exchange:a", "lap:standard"]
        );
    }

    #[test]
    fn overlap_splits_internal_and_boundary() {
        let bk = Backend::cpu();
        let log = Log::default();
        let (a, b, c) = (field("a", &log), field("b", &log), field("c", &log));
        let producer = map(&bk, "producer", &c, &a, &log);
        let lap = stencil(&bk, "lap", &a, &b, &log);

        let seq = Sequence::build(&[producer, lap], SchedulePolicy::OverlapInternal).unwrap();
        // producer, lap:internal, exchange, lap:boundary
        assert_eq!(seq.len(), 4);
        let internal = &seq.nodes()[1];
        assert_eq!(internal.data_view, DataView::Internal);
        assert_eq!(internal.deps, BTreeSet::from([0]));
        let exchange = &seq.nodes()[2];
        assert!(matches!(exchange.role, NodeRole::Exchange { .. }));
        let boundary = &seq.nodes()[3];
        assert_eq!(boundary.data_view, DataView::Boundary);
        assert!(boundary.deps.contains(&2));
        // internal work and the exchange can overlap
        assert_eq!(seq.levels()[1], vec![1, 2]);
    }

    #[test]
    fn exchange_reused_until_next_write() {
        let bk = Backend::new(DeviceType::Cpu, vec![0, 1], 1).unwrap();
        let log = Log::default();
        let (a, b, c) = (field("a", &log), field("b", &log), field("c", &log));
        let one = stencil(&bk, "one", &a, &b, &log);
        let two = stencil(&bk, "two", &a, &c, &log);
        let seq = Sequence::build(&[one, two], SchedulePolicy::Standard).unwrap();
        let exchanges = seq
            .nodes()
            .iter()
            .filter(|n| matches!(n.role, NodeRole::Exchange { .. }))
            .count();
        assert_eq!(exchanges, 1);
    }
}

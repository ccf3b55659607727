//! Per-tick scheduler driving every node on the canvas.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::node::{MicArrayNode, NodeSetting, Transport};
use crate::pipeline::OutputRouter;
use crate::registry::SharedStreamRegistry;
use crate::{Channel, MicArrayError, NodeOutput};

/// Command sent to a running [`Canvas::run`] loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasCommand {
    /// Add a mic node with the given host id.
    AddMicNode {
        /// Host-assigned node id.
        node_id: u32,
    },
    /// Remove (close) a node.
    RemoveNode {
        /// Host-assigned node id.
        node_id: u32,
    },
    /// Change the channel a node outputs.
    SelectChannel {
        /// Host-assigned node id.
        node_id: u32,
        /// Channel to output.
        channel: Channel,
    },
    /// Leave the run loop.
    Stop,
}

/// The set of mic nodes sharing one registry, ticked together.
///
/// Every node is ticked once per [`tick`](Canvas::tick): the master first, then
/// the rest in ascending node-id order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use mic_array_stream::{Canvas, MicArrayConfig, MockBackend, SharedStreamRegistry, Transport};
///
/// let backend = MockBackend::new();
/// let registry = Arc::new(SharedStreamRegistry::new(backend.clone(), MicArrayConfig::default()).unwrap());
/// let mut canvas = Canvas::new(registry);
/// canvas.add_mic_node(1).unwrap();
/// canvas.add_mic_node(2).unwrap();
/// assert_eq!(backend.open_count(), 1);
///
/// let outputs = canvas.tick(Transport::Playing);
/// assert_eq!(outputs.len(), 2);
/// ```
pub struct Canvas {
    registry: Arc<SharedStreamRegistry>,
    nodes: BTreeMap<u32, MicArrayNode>,
}

impl Canvas {
    /// Creates an empty canvas whose nodes share `registry`.
    pub fn new(registry: Arc<SharedStreamRegistry>) -> Self {
        Self {
            registry,
            nodes: BTreeMap::new(),
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<SharedStreamRegistry> {
        &self.registry
    }

    /// Adds a mic node under `node_id`.
    pub fn add_mic_node(&mut self, node_id: u32) -> Result<&mut MicArrayNode, MicArrayError> {
        if self.nodes.contains_key(&node_id) {
            return Err(MicArrayError::DuplicateNode { node_id });
        }
        let node = MicArrayNode::new(Arc::clone(&self.registry));
        tracing::debug!(node_id, connected = node.status().is_connected(), "mic node added");
        Ok(self.nodes.entry(node_id).or_insert(node))
    }

    /// Adds a mic node and restores its persisted layout.
    pub fn add_mic_node_with_setting(
        &mut self,
        node_id: u32,
        setting: &NodeSetting,
    ) -> Result<&mut MicArrayNode, MicArrayError> {
        let node = self.add_mic_node(node_id)?;
        node.apply_setting(setting);
        Ok(node)
    }

    /// Removes and closes a node.
    pub fn remove_node(&mut self, node_id: u32) -> Result<(), MicArrayError> {
        let mut node = self
            .nodes
            .remove(&node_id)
            .ok_or(MicArrayError::UnknownNode { node_id })?;
        node.close();
        tracing::debug!(node_id, "mic node removed");
        Ok(())
    }

    /// Changes the channel one node outputs.
    pub fn select_channel(&mut self, node_id: u32, channel: Channel) -> Result<(), MicArrayError> {
        self.node_mut(node_id)?.select_channel(channel);
        Ok(())
    }

    /// A node by id.
    pub fn node(&self, node_id: u32) -> Result<&MicArrayNode, MicArrayError> {
        self.nodes
            .get(&node_id)
            .ok_or(MicArrayError::UnknownNode { node_id })
    }

    /// A node by id, mutably.
    pub fn node_mut(&mut self, node_id: u32) -> Result<&mut MicArrayNode, MicArrayError> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(MicArrayError::UnknownNode { node_id })
    }

    /// Node ids in tick order.
    pub fn node_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Persisted layout of every node.
    pub fn settings(&self) -> BTreeMap<u32, NodeSetting> {
        self.nodes
            .iter()
            .map(|(&id, node)| (id, node.setting()))
            .collect()
    }

    /// Ticks every node once and collects their outputs in node-id order.
    ///
    /// The master is ticked first so that a chunk it publishes reaches every
    /// other node within the same tick.
    pub fn tick(&mut self, transport: Transport) -> Vec<NodeOutput> {
        let master = self
            .nodes
            .iter()
            .find_map(|(&node_id, node)| node.is_master().then_some(node_id));
        let master_output = master
            .and_then(|node_id| self.nodes.get_mut(&node_id))
            .map(|node| node.tick(transport));

        self.nodes
            .iter_mut()
            .map(|(&node_id, node)| {
                let output = match master_output {
                    Some(ref output) if master == Some(node_id) => output.clone(),
                    _ => node.tick(transport),
                };
                NodeOutput { node_id, output }
            })
            .collect()
    }

    fn apply(&mut self, command: CanvasCommand) -> Result<(), MicArrayError> {
        match command {
            CanvasCommand::AddMicNode { node_id } => self.add_mic_node(node_id).map(|_| ()),
            CanvasCommand::RemoveNode { node_id } => self.remove_node(node_id),
            CanvasCommand::SelectChannel { node_id, channel } => {
                self.select_channel(node_id, channel)
            }
            CanvasCommand::Stop => Ok(()),
        }
    }

    /// Ticks the canvas every `period` and routes the outputs until
    /// [`CanvasCommand::Stop`] arrives or every command sender is dropped.
    ///
    /// The transport is read from `transport` at each tick. Sinks are started
    /// before the first tick and stopped on exit.
    pub async fn run(
        &mut self,
        router: &OutputRouter,
        transport: watch::Receiver<Transport>,
        mut commands: mpsc::Receiver<CanvasCommand>,
        period: Duration,
    ) -> Result<(), MicArrayError> {
        router.start_sinks().await?;

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let state = *transport.borrow();
                    let outputs = self.tick(state);
                    router.write_tick(&outputs).await;
                }
                command = commands.recv() => match command {
                    Some(CanvasCommand::Stop) | None => break,
                    Some(command) => {
                        if let Err(e) = self.apply(command) {
                            tracing::warn!(error = %e, "canvas command rejected");
                        }
                    }
                },
            }
        }

        router.stop_sinks().await;
        Ok(())
    }
}

//! Cross-node forwarding of instantiate and destroy calls.
//!
//! Every node has its own event table. The caller reports its `wait_on` and
//! precondition events to the owner as they trigger; the owner reports the
//! finish and postcondition events back to the node that minted them.

use std::iter;
use std::sync::Arc;

use tracing::{debug, error, instrument, trace, warn};
use weave_core::{Event, NodeId, OnTrigger};
use weave_eisenbahn::{topics, EisenbahnError, Message, NodeMesh};

use super::{Launch, RuntimeInner, SubgraphId};
use crate::error::{Result, SubgraphError};
use crate::messages::{DestroyRequest, EventTriggered, InstantiateRequest};

impl RuntimeInner {
    fn mesh_for(&self, id: SubgraphId) -> Result<&Arc<dyn NodeMesh>> {
        self.ctx.mesh.as_ref().ok_or(SubgraphError::NoNetwork(id))
    }

    #[instrument(skip_all, fields(subgraph = %id, owner = id.owner.0))]
    pub(crate) fn send_instantiate(&self, id: SubgraphId, launch: &Launch<'_>) -> Result<()> {
        let mesh = self.mesh_for(id)?;
        let request = InstantiateRequest {
            subgraph: id,
            wait_on: launch.wait_on,
            finish_event: launch.finish,
            priority_adjust: launch.priority_adjust,
            args: launch.args.to_vec(),
            preconditions: launch.preconditions.to_vec(),
            postconditions: launch.postconditions.to_vec(),
            profiling: launch.profiling.clone(),
        };
        mesh.send_to(id.owner, request.to_message(self.ctx.node)?)?;
        self.metrics.lock().remote_sent += 1;
        for &event in iter::once(&launch.wait_on).chain(launch.preconditions) {
            if event.node() != id.owner {
                self.forward_trigger(event, id.owner);
            }
        }
        debug!(finish = %launch.finish, args = launch.args.len(), "instantiate forwarded");
        Ok(())
    }

    #[instrument(skip_all, fields(subgraph = %id, owner = id.owner.0))]
    pub(crate) fn send_destroy(&self, id: SubgraphId, wait_on: Event) -> Result<()> {
        let mesh = self.mesh_for(id)?;
        let request = DestroyRequest {
            subgraph: id,
            wait_on,
        };
        mesh.send_to(id.owner, request.to_message(self.ctx.node)?)?;
        self.metrics.lock().remote_sent += 1;
        if wait_on.node() != id.owner {
            self.forward_trigger(wait_on, id.owner);
        }
        debug!("destroy forwarded");
        Ok(())
    }

    /// Tell `node` about `event` once it triggers here.
    fn forward_trigger(&self, event: Event, node: NodeId) {
        if !event.exists() || node == self.ctx.node {
            return;
        }
        let inner = self.this.clone();
        self.ctx.events.add_waiter(
            event,
            OnTrigger::new(move |poisoned| {
                if let Some(inner) = inner.upgrade() {
                    inner.send_trigger(event, poisoned, node);
                }
            }),
        );
    }

    fn send_trigger(&self, event: Event, poisoned: bool, node: NodeId) {
        let Some(mesh) = self.ctx.mesh.as_ref() else {
            warn!(event = %event, node = node.0, "no mesh, event trigger not forwarded");
            return;
        };
        let notice = EventTriggered { event, poisoned };
        let sent = notice
            .to_message(self.ctx.node)
            .and_then(|message| Ok(mesh.send_to(node, message)?));
        match sent {
            Ok(()) => {
                self.metrics.lock().events_forwarded += 1;
                trace!(event = %event, node = node.0, poisoned, "event trigger forwarded");
            }
            Err(e) => {
                warn!(event = %event, node = node.0, error = %e, "event trigger not forwarded");
            }
        }
    }

    pub(crate) fn handle_message(self: &Arc<Self>, message: &Message) -> Result<()> {
        match message.topic.as_str() {
            topics::SUBGRAPH_INSTANTIATE => {
                let req: InstantiateRequest = message.decode()?;
                self.metrics.lock().remote_handled += 1;
                for &event in iter::once(&req.finish_event).chain(&req.postconditions) {
                    if event.node() != self.ctx.node {
                        self.forward_trigger(event, event.node());
                    }
                }
                let launch = Launch {
                    args: &req.args,
                    profiling: &req.profiling,
                    preconditions: &req.preconditions,
                    postconditions: &req.postconditions,
                    wait_on: req.wait_on,
                    finish: req.finish_event,
                    priority_adjust: req.priority_adjust,
                };
                if let Err(e) = self.launch_local(req.subgraph, &launch) {
                    // nobody else will trigger the sender's events
                    self.fail_launch(&launch);
                    return Err(e);
                }
                Ok(())
            }
            topics::SUBGRAPH_DESTROY => {
                let req: DestroyRequest = message.decode()?;
                self.metrics.lock().remote_handled += 1;
                self.destroy_local(req.subgraph, req.wait_on)
            }
            topics::EVENT_TRIGGERED => {
                let notice: EventTriggered = message.decode()?;
                trace!(event = %notice.event, poisoned = notice.poisoned, "remote trigger");
                self.ctx.events.trigger(notice.event, notice.poisoned);
                Ok(())
            }
            other => {
                warn!(
                    topic = other,
                    source = ?message.source,
                    "ignoring message with unknown topic"
                );
                Ok(())
            }
        }
    }

    /// The mesh dropped `message` after `send_to` had accepted it.
    pub(crate) fn undeliverable(&self, target: NodeId, message: &Message, err: &EisenbahnError) {
        self.metrics.lock().undeliverable += 1;
        if message.topic != topics::SUBGRAPH_INSTANTIATE {
            error!(topic = %message.topic, target = target.0, error = %err, "request lost");
            return;
        }
        let req: InstantiateRequest = match message.decode() {
            Ok(req) => req,
            Err(e) => {
                error!(target = target.0, error = %e, "lost request could not be decoded");
                return;
            }
        };
        error!(
            subgraph = %req.subgraph,
            target = target.0,
            error = %err,
            "instantiate request lost, poisoning its events"
        );
        self.fail_launch(&Launch {
            args: &req.args,
            profiling: &req.profiling,
            preconditions: &req.preconditions,
            postconditions: &req.postconditions,
            wait_on: req.wait_on,
            finish: req.finish_event,
            priority_adjust: req.priority_adjust,
        });
    }
}

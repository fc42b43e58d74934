//! Message routing: decides who receives each inbound event and what they get.
//!
//! [`dispatch`] applies the state change an event implies (only `join-room`
//! has one) and returns the delivery [`Scope`] together with the outbound
//! event. It never sends anything itself; the relay resolves the scope and
//! delivers after releasing the registry lock.

use huddle_proto::id::{ConnectionId, RoomId};
use huddle_proto::signal::{ClientEvent, ServerEvent};

use crate::registry::{Registry, Removed};

/// Set of connections an outbound event is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Exactly one connection.
    Peer(ConnectionId),
    /// Members of a room, optionally excluding one of them.
    Room {
        room: RoomId,
        except: Option<ConnectionId>,
    },
    /// Every live connection except one.
    Everyone { except: ConnectionId },
}

/// Outcome of routing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Recipients.
    pub scope: Scope,
    /// Event delivered to each recipient.
    pub event: ServerEvent,
}

/// Audience for mic-status and disconnect notifications.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceScope {
    /// Every other connected session, regardless of room.
    #[default]
    Global,
    /// Only the other members of the originating connection's room.
    Room,
}

/// Which connections a peer-targeted event may reach.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum TargetScope {
    /// Any live connection, whatever room it is in.
    #[default]
    Any,
    /// Only a connection in the same room as the sender.
    SameRoom,
}

/// Routing rules applied by [`dispatch`] and [`departure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub presence: PresenceScope,
    pub targets: TargetScope,
}

/// Routes one inbound event from `sender`.
///
/// Returns `None` when the event reaches nobody: the target is unknown, is
/// the sender itself, or is excluded by the policy.
pub fn dispatch(
    registry: &mut Registry,
    sender: &ConnectionId,
    event: ClientEvent,
    policy: &RoutingPolicy,
) -> Option<Dispatch> {
    match event {
        ClientEvent::JoinRoom { room_id, user_id } => {
            match registry.join(sender, room_id.clone()) {
                Ok(outcome) => {
                    tracing::info!(
                        conn_id = %sender,
                        room_id = %room_id,
                        user_id = %user_id,
                        outcome = ?outcome,
                        "connection joined room"
                    );
                }
                Err(e) => {
                    tracing::warn!(conn_id = %sender, error = %e, "join ignored");
                    return None;
                }
            }
            Some(Dispatch {
                scope: Scope::Room {
                    room: room_id,
                    except: Some(sender.clone()),
                },
                event: ServerEvent::UserConnected(user_id),
            })
        }
        ClientEvent::Offer { offer, target_id } => {
            let scope = peer_scope(registry, sender, target_id, policy)?;
            Some(Dispatch {
                scope,
                event: ServerEvent::Offer {
                    offer,
                    sender_id: sender.clone(),
                },
            })
        }
        ClientEvent::Answer { answer, target_id } => {
            let scope = peer_scope(registry, sender, target_id, policy)?;
            Some(Dispatch {
                scope,
                event: ServerEvent::Answer {
                    answer,
                    sender_id: sender.clone(),
                },
            })
        }
        ClientEvent::IceCandidate {
            candidate,
            target_id,
        } => {
            let scope = peer_scope(registry, sender, target_id, policy)?;
            Some(Dispatch {
                scope,
                event: ServerEvent::IceCandidate {
                    candidate,
                    sender_id: sender.clone(),
                },
            })
        }
        ClientEvent::TranscriptionMessage {
            transcript,
            translation,
            target_id,
        } => {
            let scope = peer_scope(registry, sender, target_id, policy)?;
            Some(Dispatch {
                scope,
                event: ServerEvent::TranscriptionMessage {
                    transcript,
                    translation,
                },
            })
        }
        ClientEvent::MicStatus {
            mic_on, sender_id, ..
        } => {
            let scope = presence_scope(registry.room_of(sender), sender, policy)?;
            Some(Dispatch {
                scope,
                event: ServerEvent::MicStatus { mic_on, sender_id },
            })
        }
    }
}

/// Routes the notification for a connection that has just been removed.
#[must_use]
pub fn departure(removed: &Removed, policy: &RoutingPolicy) -> Option<Dispatch> {
    let scope = presence_scope(removed.room.as_ref(), &removed.id, policy)?;
    Some(Dispatch {
        scope,
        event: ServerEvent::UserDisconnected(removed.id.clone()),
    })
}

fn presence_scope(
    room: Option<&RoomId>,
    origin: &ConnectionId,
    policy: &RoutingPolicy,
) -> Option<Scope> {
    match policy.presence {
        PresenceScope::Global => Some(Scope::Everyone {
            except: origin.clone(),
        }),
        PresenceScope::Room => room.map(|room| Scope::Room {
            room: room.clone(),
            except: Some(origin.clone()),
        }),
    }
}

fn peer_scope(
    registry: &Registry,
    sender: &ConnectionId,
    target: ConnectionId,
    policy: &RoutingPolicy,
) -> Option<Scope> {
    if &target == sender {
        tracing::debug!(conn_id = %sender, "dropping message addressed to its own sender");
        return None;
    }
    if !registry.contains(&target) {
        tracing::debug!(conn_id = %sender, target = %target, "unknown target, dropping");
        return None;
    }
    if policy.targets == TargetScope::SameRoom {
        let shared = registry
            .room_of(sender)
            .is_some_and(|room| registry.room_of(&target) == Some(room));
        if !shared {
            tracing::debug!(
                conn_id = %sender,
                target = %target,
                "target outside sender's room, dropping"
            );
            return None;
        }
    }
    Some(Scope::Peer(target))
}

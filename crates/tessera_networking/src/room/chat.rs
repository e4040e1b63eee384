//! Chat delivery on the global and proximity channels.

use tessera_security::sanitize_chat;
use tessera_shared::protocol::{ChatBroadcast, ChatChannel, ChatRequest};
use tessera_shared::{ErrorCode, ServerMessage, SessionId};

use super::{Room, RoomError};

impl Room {
    /// Relays a chat line. Proximity range is measured between canonical
    /// positions, never client-reported ones.
    pub(super) fn handle_chat(&mut self, session: SessionId, request: &ChatRequest) -> Result<(), RoomError> {
        let (player, entity) = {
            let state = self.sessions.get(session).ok_or(RoomError::UnknownSession(session))?;
            (state.player, state.entity)
        };
        let Some(text) = sanitize_chat(&request.text, self.config.gameplay.chat_max_length) else {
            self.outbox.send(session, ServerMessage::error(ErrorCode::ChatRejected, "empty chat message"));
            return Ok(());
        };

        let targets: Vec<SessionId> = match request.channel {
            ChatChannel::Global => self.sessions.iter().map(|s| s.id).collect(),
            ChatChannel::Proximity => {
                let Some(origin) = self.store.position(entity) else {
                    tracing::error!(session, %entity, "chatting player has no entity");
                    return Ok(());
                };
                let radius = self.config.gameplay.proximity_radius;
                self.sessions
                    .iter()
                    .filter(|s| {
                        self.store
                            .position(s.entity)
                            .is_some_and(|p| p.0.distance(origin.0) <= radius)
                    })
                    .map(|s| s.id)
                    .collect()
            }
        };

        tracing::debug!(session, player, channel = ?request.channel, recipients = targets.len(), "chat");
        let message = ServerMessage::Chat(ChatBroadcast {
            player_id: player,
            channel: request.channel,
            text,
            server_time: self.now_ms,
        });
        self.outbox.broadcast(targets, &message);
        Ok(())
    }
}

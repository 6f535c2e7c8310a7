use super::messages::ClientEvent;

/// Which thread room a session is in, and whether the gateway knows it.
///
/// A session is in at most one room. `joined` is only true while the current
/// connection has seen a `join_room` for `current`; a fresh connection starts
/// with it cleared so the room is joined again.
#[derive(Debug, Default)]
pub struct RoomMembership {
    current: Option<String>,
    joined: bool,
}

impl RoomMembership {
    /// Frames needed to move into `room`. Empty when already there.
    pub fn join(&mut self, room: &str, online: bool) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        if self.current.as_deref() == Some(room) && (self.joined || !online) {
            return events;
        }

        if online && self.joined {
            if let Some(previous) = self.current.take() {
                events.push(ClientEvent::LeaveRoom(previous));
            }
        }

        self.current = Some(room.to_string());
        self.joined = online;
        if online {
            events.push(ClientEvent::JoinRoom(room.to_string()));
        }
        events
    }

    pub fn leave(&mut self, room: &str, online: bool) -> Vec<ClientEvent> {
        if self.current.as_deref() == Some(room) {
            self.current = None;
            self.joined = false;
        }

        if online {
            vec![ClientEvent::LeaveRoom(room.to_string())]
        } else {
            Vec::new()
        }
    }

    pub fn on_connected(&mut self) -> Vec<ClientEvent> {
        match &self.current {
            Some(room) => {
                self.joined = true;
                vec![ClientEvent::JoinRoom(room.clone())]
            }
            None => Vec::new(),
        }
    }

    pub fn on_disconnected(&mut self) {
        self.joined = false;
    }

    /// Frames to send before closing the connection for good.
    pub fn on_shutdown(&mut self) -> Vec<ClientEvent> {
        let events = match self.current.take() {
            Some(room) if self.joined => vec![ClientEvent::LeaveRoom(room)],
            _ => Vec::new(),
        };
        self.joined = false;
        events
    }
}

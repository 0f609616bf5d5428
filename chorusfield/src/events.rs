//! Notifications produced by the [`AudioManager`](crate::AudioManager)

#[derive(Debug, Clone, PartialEq)]
pub enum ChorusEvent {
    /// A user started or stopped speaking.
    AudioActivity { id: String, is_active: bool },
    /// The output started running; sent once per manager.
    AudioReady,
    /// A one-shot clip play finished on its own.
    ClipEnded { name: String },
}

impl ChorusEvent {
    /// User or clip the event concerns, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::AudioActivity { id, .. } => Some(id),
            Self::ClipEnded { name } => Some(name),
            Self::AudioReady => None,
        }
    }

    pub fn is_activity(&self) -> bool {
        matches!(self, Self::AudioActivity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_names_user_or_clip() {
        let activity = ChorusEvent::AudioActivity {
            id: "bob".to_string(),
            is_active: true,
        };
        assert_eq!(activity.subject(), Some("bob"));
        assert!(activity.is_activity());
        assert_eq!(ChorusEvent::AudioReady.subject(), None);
        assert_eq!(
            ChorusEvent::ClipEnded {
                name: "ping".to_string()
            }
            .subject(),
            Some("ping")
        );
    }
}

/// Topic names for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub command: String,
    pub state: String,
    pub heartbeat: String,
}

impl Topics {
    pub fn for_thing(thing_name: &str) -> Self {
        Self {
            command: format!("{}/command", thing_name),
            state: format!("{}/state", thing_name),
            heartbeat: format!("{}/heartbeat", thing_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_rooted_at_thing_name() {
        let topics = Topics::for_thing("esp32-relay-01");
        assert_eq!(topics.command, "esp32-relay-01/command");
        assert_eq!(topics.state, "esp32-relay-01/state");
        assert_eq!(topics.heartbeat, "esp32-relay-01/heartbeat");
    }
}

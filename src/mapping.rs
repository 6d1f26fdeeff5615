use serde::{Deserialize, Serialize};

/// Attribute names the aggregator reads from each kind of input record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldMapping {
    pub msg_id: String,
    pub msg_channel: String,
    pub msg_channel_name: String,
    pub msg_created: String,
    pub msg_user: String,
    pub msg_content: String,
    pub mc_msg_id: String,
    pub mc_crit_id: String,
    pub mc_count: String,
    pub mc_bool: String,
    pub mc_text: String,
    pub crit_id: String,
    pub crit_name: String,
    pub user_id: String,
    pub user_name: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            msg_id: "id".to_string(),
            msg_channel: "channel_id".to_string(),
            msg_channel_name: "channel".to_string(),
            msg_created: "sent_at".to_string(),
            msg_user: "user_id".to_string(),
            msg_content: "content".to_string(),
            mc_msg_id: "message_id".to_string(),
            mc_crit_id: "criterion_id".to_string(),
            mc_count: "count_value".to_string(),
            mc_bool: "is_fulfilled".to_string(),
            mc_text: "text_value".to_string(),
            crit_id: "id".to_string(),
            crit_name: "name".to_string(),
            user_id: "id".to_string(),
            user_name: "username".to_string(),
        }
    }
}

impl FieldMapping {
    /// Returns the first mapping entry whose attribute name is blank.
    pub fn validate(&self) -> Result<(), &'static str> {
        let entries = [
            ("msg_id", &self.msg_id),
            ("msg_channel", &self.msg_channel),
            ("msg_channel_name", &self.msg_channel_name),
            ("msg_created", &self.msg_created),
            ("msg_user", &self.msg_user),
            ("msg_content", &self.msg_content),
            ("mc_msg_id", &self.mc_msg_id),
            ("mc_crit_id", &self.mc_crit_id),
            ("mc_count", &self.mc_count),
            ("mc_bool", &self.mc_bool),
            ("mc_text", &self.mc_text),
            ("crit_id", &self.crit_id),
            ("crit_name", &self.crit_name),
            ("user_id", &self.user_id),
            ("user_name", &self.user_name),
        ];

        match entries.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((key, _)) => Err(*key),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_mapping_keeps_defaults() {
        let mapping: FieldMapping = toml::from_str(
            r#"
            msg_channel = "room"
            mc_count = "hits"
            "#,
        )
        .unwrap();

        assert_eq!(mapping.msg_channel, "room");
        assert_eq!(mapping.mc_count, "hits");
        assert_eq!(mapping.msg_id, "id");
        assert_eq!(mapping.crit_name, "name");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<FieldMapping, _> = toml::from_str(r#"msg_channel_label = "x""#);
        assert!(result.is_err());
    }

    #[test]
    fn blank_names_fail_validation() {
        let mapping = FieldMapping {
            mc_text: "  ".to_string(),
            ..FieldMapping::default()
        };
        assert_eq!(mapping.validate(), Err("mc_text"));
        assert_eq!(FieldMapping::default().validate(), Ok(()));
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::AreaId;

/// Registration payload a scheduler publishes in the coordination service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerConfig {
    #[serde(rename = "AreaID")]
    pub area_id: AreaId,
    #[serde(rename = "SchedulerURL")]
    pub url: String,
    pub access_token: String,
}

// Access tokens stay out of logs.
impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("area_id", &self.area_id)
            .field("url", &self.url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_registration_payload() {
        let raw = r#"{"AreaID":"Asia-China-Guangdong","SchedulerURL":"https://10.0.0.4:3456/rpc/v0","AccessToken":"tok"}"#;
        let cfg: SchedulerConfig = serde_json::from_str(raw).expect("decode");
        assert_eq!(cfg.area_id.as_str(), "Asia-China-Guangdong");
        assert_eq!(cfg.url, "https://10.0.0.4:3456/rpc/v0");
        assert!(!format!("{cfg:?}").contains("\"tok\""));
    }
}

use serde::{Deserialize, Serialize};
use vhwa_protocol::fourcc::KNOWN_FOURCCS;

use crate::support_info::VhwaInfo;

/// Per-machine overlay preferences, loaded by the host from its config store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VhwaSettings {
    /// Use linear filtering when an overlay is stretched.
    pub stretch_linear: bool,
    /// FOURCCs the guest may use, in reporting order.
    pub fourcc_enabled: Vec<u32>,
}

impl Default for VhwaSettings {
    fn default() -> Self {
        Self {
            stretch_linear: false,
            fourcc_enabled: KNOWN_FOURCCS.to_vec(),
        }
    }
}

impl VhwaSettings {
    /// FOURCCs both enabled here and supported by `info`, in enabled-list order.
    pub fn intersection(&self, info: &VhwaInfo) -> Vec<u32> {
        self.fourcc_enabled
            .iter()
            .copied()
            .filter(|f| info.fourcc_supported().contains(f))
            .collect()
    }

    pub fn is_supported(&self, info: &VhwaInfo, fourcc: u32) -> bool {
        self.fourcc_enabled.contains(&fourcc) && info.fourcc_supported().contains(&fourcc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support_info::GlCaps;
    use pretty_assertions::assert_eq;
    use vhwa_protocol::fourcc::{FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2, FOURCC_YV12};

    #[test]
    fn missing_fields_take_defaults() {
        let s: VhwaSettings = serde_json::from_str(r#"{"stretch_linear": true}"#).unwrap();
        assert!(s.stretch_linear);
        assert_eq!(s.fourcc_enabled, KNOWN_FOURCCS.to_vec());
    }

    #[test]
    fn intersection_keeps_enabled_order() {
        let info = VhwaInfo::new(GlCaps::full());
        let s = VhwaSettings {
            stretch_linear: false,
            fourcc_enabled: vec![FOURCC_YV12, FOURCC_AYUV],
        };
        assert_eq!(s.intersection(&info), vec![FOURCC_YV12, FOURCC_AYUV]);
        assert!(s.is_supported(&info, FOURCC_YV12));
        assert!(!s.is_supported(&info, FOURCC_UYVY));

        let two_units = VhwaInfo::new(GlCaps {
            max_texture_units: 2,
            ..GlCaps::full()
        });
        assert_eq!(s.intersection(&two_units), vec![FOURCC_AYUV]);
        assert!(!VhwaSettings::default().is_supported(&two_units, FOURCC_YV12));
        assert!(VhwaSettings::default().is_supported(&two_units, FOURCC_YUY2));
    }
}

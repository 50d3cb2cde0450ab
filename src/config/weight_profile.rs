use crate::domain::media::MediaItem;
use crate::domain::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 权重配置（持久化对象）
///
/// 存储位置：config_kv（scope_id='global'，key='weight_profile'，JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    /// 新素材加权倍数
    #[serde(default = "default_new_release_boost")]
    pub new_release_boost: f64,

    /// 按素材类型的权重倍数（缺省 1.0）
    #[serde(default)]
    pub kind_multipliers: HashMap<MediaKind, f64>,
}

fn default_new_release_boost() -> f64 {
    2.0
}

impl Default for WeightProfile {
    fn default() -> Self {
        Self {
            new_release_boost: default_new_release_boost(),
            kind_multipliers: HashMap::new(),
        }
    }
}

impl WeightProfile {
    /// 计算素材的有效权重
    ///
    /// 非法值（负数/NaN）按 0 处理
    pub fn effective_weight(&self, item: &MediaItem) -> f64 {
        let mut weight = item.weight;
        if item.is_new_release {
            weight *= self.new_release_boost;
        }
        if let Some(multiplier) = self.kind_multipliers.get(&item.kind) {
            weight *= multiplier;
        }
        if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_release_boost() {
        let profile = WeightProfile::default();
        let mut item = MediaItem::new("M1", MediaKind::Music, 200).with_weight(1.5);
        assert_eq!(profile.effective_weight(&item), 1.5);

        item.is_new_release = true;
        assert_eq!(profile.effective_weight(&item), 3.0);
    }

    #[test]
    fn test_kind_multiplier_and_invalid_weight() {
        let mut profile = WeightProfile::default();
        profile.kind_multipliers.insert(MediaKind::Promo, 0.5);

        let promo = MediaItem::new("P1", MediaKind::Promo, 30).with_weight(4.0);
        assert_eq!(profile.effective_weight(&promo), 2.0);

        let broken = MediaItem::new("M2", MediaKind::Music, 200).with_weight(f64::NAN);
        assert_eq!(profile.effective_weight(&broken), 0.0);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let profile: WeightProfile = serde_json::from_str(r#"{"new_release_boost": 3.0}"#).unwrap();
        assert_eq!(profile.new_release_boost, 3.0);
        assert!(profile.kind_multipliers.is_empty());
    }
}

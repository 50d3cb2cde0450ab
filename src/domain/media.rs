// ==========================================
// 广播排播系统 - 媒体素材领域模型
// ==========================================
// 红线: 单次排程运行期间素材不可变
// ==========================================

use crate::domain::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// MediaItem - 媒体素材 (音乐/广告/台呼/宣传)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,                         // 素材ID
    pub kind: MediaKind,                    // 素材类型
    pub campaign_id: Option<String>,        // 广告活动ID
    pub advertiser_id: Option<String>,      // 广告主ID
    pub duration_secs: u32,                 // 时长 (秒)
    pub genre: Option<String>,              // 曲风
    pub bpm: Option<u16>,                   // 节拍
    #[serde(default)]
    pub daypart_eligible: BTreeSet<String>, // 允许播出的时段 (空 = 不限)
    #[serde(default)]
    pub allow_back_to_back: bool,           // 允许连播 (仅豁免间隔规则)
    #[serde(default)]
    pub is_new_release: bool,               // 新歌/新素材
    pub active: bool,                       // 是否启用
    #[serde(default = "default_weight")]
    pub weight: f64,                        // 权重 (WEIGHTED 轮播使用)
}

fn default_weight() -> f64 {
    1.0
}

impl MediaItem {
    /// 创建启用状态的素材 (其余字段取默认值)
    pub fn new(id: impl Into<String>, kind: MediaKind, duration_secs: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            campaign_id: None,
            advertiser_id: None,
            duration_secs,
            genre: None,
            bpm: None,
            daypart_eligible: BTreeSet::new(),
            allow_back_to_back: false,
            is_new_release: false,
            active: true,
            weight: default_weight(),
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_dayparts<I, S>(mut self, dayparts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.daypart_eligible = dayparts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_back_to_back(mut self, allow: bool) -> Self {
        self.allow_back_to_back = allow;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// 是否允许在指定时段播出
    ///
    /// 红线: 时段准入为硬约束,任何放宽层级都不得跳过
    pub fn is_daypart_eligible(&self, daypart_id: &str) -> bool {
        self.daypart_eligible.is_empty() || self.daypart_eligible.contains(daypart_id)
    }
}

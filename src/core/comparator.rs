//! 三方比较 - 根据主端、副端当前元数据和上次同步状态决定每个文件的同步动作

use crate::core::status::{SyncStatusItem, SyncStatusMap};
use crate::storage::FileMeta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// 副本的一端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Primary,
    Secondary,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Primary => Side::Secondary,
            Side::Secondary => Side::Primary,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Primary => write!(f, "primary"),
            Side::Secondary => write!(f, "secondary"),
        }
    }
}

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 已同步，无需操作
    Skip { name: String },
    /// 从一端复制到另一端（新建、单端修改或删除后又被编辑）
    Copy { name: String, from: Side },
    /// 从一端删除（另一端在同步后删除了该文件）
    Delete { name: String, from: Side },
    /// 两端都有但从未同步过：内容相同只记录状态，否则为首次冲突
    FirstContact { name: String },
    /// 两端都在上次同步后修改：内容相同只刷新状态，否则为冲突
    BothModified { name: String },
    /// 两端都已没有该文件，只清理状态记录
    DropStatus { name: String },
}

impl SyncAction {
    pub fn name(&self) -> &str {
        match self {
            SyncAction::Skip { name }
            | SyncAction::Copy { name, .. }
            | SyncAction::Delete { name, .. }
            | SyncAction::FirstContact { name }
            | SyncAction::BothModified { name }
            | SyncAction::DropStatus { name } => name,
        }
    }

    /// 是否需要访问存储
    pub fn needs_io(&self) -> bool {
        !matches!(self, SyncAction::Skip { .. } | SyncAction::DropStatus { .. })
    }
}

/// 对单个文件分类
pub fn classify(
    name: &str,
    primary: Option<&FileMeta>,
    secondary: Option<&FileMeta>,
    status: Option<&SyncStatusItem>,
) -> SyncAction {
    let name = name.to_string();

    match (primary, secondary, status) {
        (Some(_), Some(_), None) => SyncAction::FirstContact { name },

        (Some(p), Some(s), Some(st)) => {
            let primary_changed = p.last_modified > st.last_sync;
            let secondary_changed = s.last_modified > st.last_sync;
            match (primary_changed, secondary_changed) {
                (false, false) => SyncAction::Skip { name },
                (true, false) => SyncAction::Copy {
                    name,
                    from: Side::Primary,
                },
                (false, true) => SyncAction::Copy {
                    name,
                    from: Side::Secondary,
                },
                (true, true) => SyncAction::BothModified { name },
            }
        }

        // 只有一端有，且从未同步过：新建文件
        (Some(_), None, None) => SyncAction::Copy {
            name,
            from: Side::Primary,
        },
        (None, Some(_), None) => SyncAction::Copy {
            name,
            from: Side::Secondary,
        },

        // 只有一端有，但同步过：另一端删除了它
        (Some(p), None, Some(st)) => remaining_on_one_side(name, p, st, Side::Primary),
        (None, Some(s), Some(st)) => remaining_on_one_side(name, s, st, Side::Secondary),

        (None, None, Some(_)) => SyncAction::DropStatus { name },

        (None, None, None) => SyncAction::Skip { name },
    }
}

/// 删除后又被编辑的文件恢复到另一端，否则把删除传播过去
fn remaining_on_one_side(
    name: String,
    meta: &FileMeta,
    status: &SyncStatusItem,
    side: Side,
) -> SyncAction {
    if meta.last_modified > status.last_sync {
        SyncAction::Copy { name, from: side }
    } else {
        SyncAction::Delete { name, from: side }
    }
}

/// 比较两端文件列表和状态表，返回所有文件的同步动作（按文件名排序）
pub fn compare_trees(
    primary: &HashMap<String, FileMeta>,
    secondary: &HashMap<String, FileMeta>,
    status: &SyncStatusMap,
) -> Vec<SyncAction> {
    let all_names: BTreeSet<&String> = primary
        .keys()
        .chain(secondary.keys())
        .chain(status.keys())
        .collect();

    all_names
        .into_iter()
        .map(|name| {
            classify(
                name,
                primary.get(name),
                secondary.get(name),
                status.get(name),
            )
        })
        .collect()
}

/// 统计同步动作
pub fn summarize_actions(actions: &[SyncAction]) -> ActionSummary {
    let mut summary = ActionSummary::default();

    for action in actions {
        match action {
            SyncAction::Copy { from, .. } => match from {
                Side::Primary => summary.copy_to_secondary += 1,
                Side::Secondary => summary.copy_to_primary += 1,
            },
            SyncAction::Delete { .. } => summary.delete_count += 1,
            SyncAction::Skip { .. } => summary.skip_count += 1,
            SyncAction::FirstContact { .. } | SyncAction::BothModified { .. } => {
                summary.compare_count += 1
            }
            SyncAction::DropStatus { .. } => summary.stale_count += 1,
        }
    }

    summary
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSummary {
    pub copy_to_secondary: usize,
    pub copy_to_primary: usize,
    pub delete_count: usize,
    pub skip_count: usize,
    /// 需要读取两端内容比较的文件（可能冲突）
    pub compare_count: usize,
    pub stale_count: usize,
}

impl ActionSummary {
    pub fn total_files(&self) -> usize {
        self.copy_to_secondary
            + self.copy_to_primary
            + self.delete_count
            + self.skip_count
            + self.compare_count
            + self.stale_count
    }
}

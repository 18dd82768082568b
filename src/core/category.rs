//! 节点分类

/// CivitAI 在线生成
pub const CATEGORY_CIVITAI: &str = "Civitai";
/// 模型选择器与工作流工具
pub const CATEGORY_BJORNULF: &str = "Bjornulf";

//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! 进程内工具用参数结构体 derive JsonSchema，这里转为绑定给模型的 parameters 对象。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回类型 T 的 JSON Schema（作为工具 parameters）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    })
}

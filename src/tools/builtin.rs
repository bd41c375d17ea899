//! 进程内演示工具（mock 后端与离线测试使用）

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{FnTool, Tool};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(json!(text))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BinaryArgs {
    /// 左操作数
    pub a: f64,
    /// 右操作数
    pub b: f64,
}

fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        json!({ "result": v as i64 })
    } else {
        json!({ "result": v })
    }
}

/// echo + 四则运算、乘方、取模
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(EchoTool),
        Arc::new(FnTool::typed("add", "Add two numbers", |x: BinaryArgs| async move {
            Ok(number(x.a + x.b))
        })),
        Arc::new(FnTool::typed(
            "subtract",
            "Subtract b from a",
            |x: BinaryArgs| async move { Ok(number(x.a - x.b)) },
        )),
        Arc::new(FnTool::typed(
            "multiply",
            "Multiply two numbers",
            |x: BinaryArgs| async move { Ok(number(x.a * x.b)) },
        )),
        Arc::new(FnTool::typed("divide", "Divide a by b", |x: BinaryArgs| async move {
            if x.b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(number(x.a / x.b))
            }
        })),
        Arc::new(FnTool::typed("power", "Raise a to the power b", |x: BinaryArgs| async move {
            Ok(number(x.a.powf(x.b)))
        })),
        Arc::new(FnTool::typed(
            "modulus",
            "Remainder of a divided by b",
            |x: BinaryArgs| async move {
                if x.b == 0.0 {
                    Err("modulus by zero".to_string())
                } else {
                    Ok(number(x.a.rem_euclid(x.b)))
                }
            },
        )),
    ]
}

//! 路径参数校验器
//!
//! 每个路由记录可以挂载若干参数校验器 `{name, validate(value) -> bool, error_message?}`。
//! 校验失败时匹配结果的 `validation_errors` 会带上失败详情。

use futures::future::BoxFuture;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::utils::{NavError, Result};

/// UUID 格式正则表达式
static UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("Invalid uuid regex")
});

/// 校验错误详情
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationError {
    /// 参数名
    pub field: String,
    /// 参数值
    pub value: String,
    /// 错误消息
    pub message: String,
    /// 错误码
    pub code: ValidationErrorCode,
}

impl ValidationError {
    /// 创建新的校验错误
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
        code: ValidationErrorCode,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}={}: {}", self.code, self.field, self.value, self.message)
    }
}

/// 校验错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    /// 格式无效
    InvalidFormat,
    /// 值超出范围
    OutOfRange,
    /// 值不在允许集合内
    NotAllowed,
    /// 自定义校验失败
    Custom,
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorCode::InvalidFormat => write!(f, "INVALID_FORMAT"),
            ValidationErrorCode::OutOfRange => write!(f, "OUT_OF_RANGE"),
            ValidationErrorCode::NotAllowed => write!(f, "NOT_ALLOWED"),
            ValidationErrorCode::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// 汇总多个校验错误为一个 `NavError::MatchValidation`
pub fn into_nav_error(errors: &[ValidationError]) -> NavError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    NavError::MatchValidation(messages.join("; "))
}

type SyncCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type AsyncCheck = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone)]
enum Check {
    Sync(SyncCheck),
    Async(AsyncCheck),
}

/// 路径参数校验器
#[derive(Clone)]
pub struct ParamValidator {
    /// 参数名
    pub name: String,
    check: Check,
    error_message: Option<String>,
    code: ValidationErrorCode,
}

impl fmt::Debug for ParamValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamValidator")
            .field("name", &self.name)
            .field("code", &self.code)
            .field("async", &matches!(self.check, Check::Async(_)))
            .finish()
    }
}

impl ParamValidator {
    /// 使用同步闭包创建校验器
    pub fn new<F>(name: impl Into<String>, validate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Check::Sync(Arc::new(validate)),
            error_message: None,
            code: ValidationErrorCode::Custom,
        }
    }

    /// 使用异步闭包创建校验器（例如需要查询远端状态）
    pub fn new_async<F>(name: impl Into<String>, validate: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Check::Async(Arc::new(validate)),
            error_message: None,
            code: ValidationErrorCode::Custom,
        }
    }

    /// 设置错误消息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    fn with_code(mut self, code: ValidationErrorCode) -> Self {
        self.code = code;
        self
    }

    /// 数字参数
    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, |v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
            .with_message("必须是数字")
            .with_code(ValidationErrorCode::InvalidFormat)
    }

    /// UUID 参数
    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, |v| UUID_REGEX.is_match(v))
            .with_message("必须是 UUID")
            .with_code(ValidationErrorCode::InvalidFormat)
    }

    /// 正则参数，模式自动锚定首尾
    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        let message = format!("必须匹配 {}", pattern);
        Ok(Self::new(name, move |v| regex.is_match(v))
            .with_message(message)
            .with_code(ValidationErrorCode::InvalidFormat))
    }

    /// 枚举参数
    pub fn one_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let message = format!("必须是 [{}] 之一", values.join(", "));
        Self::new(name, move |v| values.iter().any(|allowed| allowed == v))
            .with_message(message)
            .with_code(ValidationErrorCode::NotAllowed)
    }

    /// 长度范围参数（按字符计数，闭区间）
    pub fn length(name: impl Into<String>, min: usize, max: usize) -> Self {
        Self::new(name, move |v| {
            let len = v.chars().count();
            len >= min && len <= max
        })
        .with_message(format!("长度必须在 {} 到 {} 之间", min, max))
        .with_code(ValidationErrorCode::OutOfRange)
    }

    /// 校验单个值
    pub async fn validate(&self, value: &str) -> bool {
        match &self.check {
            Check::Sync(f) => f(value),
            Check::Async(f) => f(value.to_string()).await,
        }
    }

    fn error_for(&self, value: &str) -> ValidationError {
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| "参数校验失败".to_string());
        ValidationError::new(&self.name, value, message, self.code)
    }
}

/// 对参数表执行一组校验器
///
/// 参数表中不存在的参数不参与校验。
pub async fn validate_params(
    validators: &[ParamValidator],
    params: &BTreeMap<String, String>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for validator in validators {
        let Some(value) = params.get(&validator.name) else {
            continue;
        };
        if !validator.validate(value).await {
            errors.push(validator.error_for(value));
        }
    }
    errors
}

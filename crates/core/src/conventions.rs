//! Well-known attribute keys and span names shared by every tracer variant.

pub const ATTR_SESSION_ID: &str = "session.id";
pub const ATTR_QUERY: &str = "query";
pub const ATTR_RESPONSE: &str = "response";
pub const ATTR_SPAN_KIND: &str = "span.kind";

pub const ATTR_LLM_MODEL: &str = "llm.model";
pub const ATTR_LLM_PROVIDER: &str = "llm.provider";
pub const ATTR_LLM_TOKENS_TOTAL: &str = "llm.tokens.total";
pub const ATTR_LLM_TOKENS_INPUT: &str = "llm.tokens.input";
pub const ATTR_LLM_TOKENS_OUTPUT: &str = "llm.tokens.output";
/// Older instrumentation writes the token count here.
pub const ATTR_TOKEN_COUNT_LEGACY: &str = "token_count";

pub const ATTR_TOOL_NAME: &str = "tool.name";

pub const ATTR_ERROR: &str = "error";
pub const ATTR_ERROR_MESSAGE: &str = "error.message";
pub const ATTR_ERROR_TYPE: &str = "error.type";

pub const ATTR_METRIC_NAME: &str = "metric.name";
pub const ATTR_METRIC_VALUE: &str = "metric.value";
pub const ATTR_METRIC_LABEL_PREFIX: &str = "metric.label.";

pub const ATTR_HTTP_STATUS_CODE: &str = "http.status_code";

pub const KIND_METRIC: &str = "metric";
pub const KIND_EVENT: &str = "event";

pub const EVENT_EXCEPTION: &str = "exception";

pub const SPAN_AGENT_CONVERSATION: &str = "agent.conversation";
pub const SPAN_LLM_COMPLETION: &str = "llm.completion";
pub const SPAN_TOOL_EXECUTE: &str = "tool.execute";
pub const SPAN_JUDGE_EVALUATION: &str = "judge.evaluation";
pub const SPAN_JUDGE_VERDICT_EXPORT: &str = "hawk.judge_verdict.export";

pub const METRIC_SPAN_PREFIX: &str = "metric.";
pub const EVENT_SPAN_PREFIX: &str = "event.";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STORE_DATABASE: &str = "Huroa2";
pub const DEFAULT_STATUS_UPSTREAM: &str = "https://huaroa-production.up.railway.app";
pub const DEFAULT_CORS_ALLOW_ORIGINS: &str = "*";
pub const DEFAULT_SERVICE_NAME: &str = "edugame-server";
pub const TRACER_NAME: &str = "edugame-tracer";
pub const DEFAULT_LOG_FILTER: &str = "edugame_server=debug,tower_http=debug,axum=debug,info";

// Date handling
pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const BANGKOK_UTC_OFFSET_HOURS: i64 = 7;
pub const BUDDHIST_ERA_OFFSET: i32 = 543;
pub const DEFAULT_BREAKDOWN_DAYS: i64 = 7;
pub const MAX_BREAKDOWN_DAYS: i64 = 366;

// Default query forwarded to the upstream usage-average endpoint
pub const USAGE_AVERAGE_DEFAULT_QUERY: &str = "period=all";

// User-facing messages. The pages consuming these are Thai.
pub const MSG_FEEDBACK_REQUIRED: &str = "กรุณากรอกข้อเสนอแนะ";
pub const MSG_FEEDBACK_SAVED: &str = "บันทึกข้อเสนอแนะสำเร็จ";
pub const MSG_FEEDBACK_SAVED_FALLBACK: &str = "บันทึกข้อเสนอแนะสำเร็จ (fallback)";
pub const MSG_MALFORMED_BODY: &str = "malformed request body";
pub const MSG_STORAGE_UNAVAILABLE: &str = "storage is currently unavailable";
pub const MSG_INTERNAL: &str = "internal server error";

use http::request::Parts as ReqParts;
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// `*` allows any origin; anything else is matched as an origin suffix (e.g. `.example.ac.th`)
pub fn cors(allowed_origins: &str) -> CorsLayer {
    let allowed = if allowed_origins == "*" {
        AllowOrigin::any()
    } else {
        let suffix = allowed_origins.to_owned();
        AllowOrigin::predicate(move |org: &HeaderValue, _: &ReqParts| {
            org.as_bytes().ends_with(suffix.as_bytes())
        })
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(allowed)
}

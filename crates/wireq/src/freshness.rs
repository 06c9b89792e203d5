//! crates/wireq/src/freshness.rs
//!
//! Derives a [`CachePolicy`] from a response's `Cache-Control`, `Expires`,
//! `Date`, and `ETag` headers, following the conventional HTTP freshness
//! algorithm: `max-age` takes precedence over `Expires`; `Date` (when
//! present) anchors relative ages instead of local wall-clock time; soft
//! TTL defaults to the hard TTL when the server gives no separate
//! heuristic. A request-level TTL override replaces the server policy
//! outright, and doing so without the server having allowed caching in the
//! first place is treated as a mistake: it logs a warning and returns
//! [`CachePolicy::Uncacheable`] rather than caching against the server's
//! wishes.

use std::collections::HashMap;

use wireq_codec::CacheHeader;

/// The freshness policy derived for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// The response may be cached with the given header fields. `ttl` and
    /// `soft_ttl` are epoch milliseconds.
    Cacheable {
        /// Hard expiry (epoch ms).
        ttl: i64,
        /// Soft expiry / refresh horizon (epoch ms).
        soft_ttl: i64,
        /// `ETag` value, if the server sent one.
        etag: Option<String>,
    },
    /// The response must not be cached.
    Uncacheable,
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let (name, value) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse::<i64>().ok()
        } else {
            None
        }
    })
}

fn has_directive(cache_control: &str, name: &str) -> bool {
    cache_control
        .split(',')
        .any(|directive| directive.trim().eq_ignore_ascii_case(name))
}

/// Parses an HTTP-date (RFC 7231 IMF-fixdate, e.g.
/// `"Sun, 06 Nov 1994 08:49:37 GMT"`) into epoch milliseconds. Returns
/// `None` on anything this workspace doesn't need to support (obsolete
/// date formats, malformed input) rather than pulling in a full date
/// library for a handful of freshness headers.
fn parse_http_date(value: &str) -> Option<i64> {
    // "Wkd, DD Mon YYYY HH:MM:SS GMT"
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return None;
    }
    let day: i64 = parts[1].parse().ok()?;
    let month = match parts[2] {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let year: i64 = parts[3].parse().ok()?;
    let mut time = parts[4].split(':');
    let hour: i64 = time.next()?.parse().ok()?;
    let minute: i64 = time.next()?.parse().ok()?;
    let second: i64 = time.next()?.parse().ok()?;

    Some(civil_to_epoch_ms(year, month, day, hour, minute, second))
}

/// Days-from-civil algorithm (Howard Hinnant's), avoiding a chrono
/// dependency for a handful of header timestamps.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_to_epoch_ms(year: i64, month: i64, day: i64, hour: i64, minute: i64, second: i64) -> i64 {
    let days = days_from_civil(year, month, day);
    ((days * 86_400) + hour * 3600 + minute * 60 + second) * 1000
}

/// Derives a [`CachePolicy`] for a response carrying `headers`, observed at
/// `received_at_ms` (epoch ms). `ttl_override_ms`/`soft_ttl_override_ms`
/// come from the request ([`wireq_request::Request::ttl_override_ms`] /
/// [`wireq_request::Request::soft_ttl_override_ms`]) and replace whatever
/// the server declared.
#[must_use]
pub fn from_headers(
    headers: &HashMap<String, String>,
    received_at_ms: i64,
    ttl_override_ms: Option<i64>,
    soft_ttl_override_ms: Option<i64>,
) -> CachePolicy {
    let cache_control = header_value(headers, "Cache-Control");
    let etag = header_value(headers, "ETag").map(str::to_owned);

    if let Some(cc) = cache_control {
        if has_directive(cc, "no-store") || has_directive(cc, "no-cache") {
            if ttl_override_ms.is_none() {
                return CachePolicy::Uncacheable;
            }
            tracing::warn!("ttl override without server cache allowance; request not cached");
            return CachePolicy::Uncacheable;
        }
    }

    let anchor = header_value(headers, "Date").and_then(parse_http_date).unwrap_or(received_at_ms);

    let server_ttl = cache_control
        .and_then(parse_max_age)
        .map(|max_age_secs| anchor + max_age_secs * 1000)
        .or_else(|| header_value(headers, "Expires").and_then(parse_http_date));

    let Some(ttl) = ttl_override_ms.or(server_ttl) else {
        if ttl_override_ms.is_none() {
            return CachePolicy::Uncacheable;
        }
        unreachable!("ttl_override_ms is Some in this branch");
    };

    let soft_ttl = soft_ttl_override_ms.unwrap_or(ttl);

    CachePolicy::Cacheable { ttl, soft_ttl, etag }
}

/// Builds a [`CacheHeader`] from a derived [`CachePolicy::Cacheable`] plus
/// the remaining fields a full cache record needs.
#[must_use]
pub fn cache_header(
    key: &str,
    policy_ttl: i64,
    policy_soft_ttl: i64,
    policy_etag: Option<String>,
    server_date: i64,
    keep_until: i64,
    is_image: bool,
    response_headers: Vec<(String, String)>,
) -> CacheHeader {
    CacheHeader {
        key: key.to_owned(),
        etag: policy_etag,
        server_date,
        ttl: policy_ttl,
        soft_ttl: policy_soft_ttl,
        keep_until,
        is_image,
        response_headers,
    }
}

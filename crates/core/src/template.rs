//! Directory template expansion.
//!
//! Templates contain bracketed tokens such as `[date:custom:Y]/[field:name]`.
//! Unknown tokens are left in place verbatim.

use time::OffsetDateTime;

/// Source of the current time for template expansion.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock (UTC).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock pinned to a single instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Values available to template tokens.
#[derive(Clone, Copy, Debug)]
pub struct TokenContext<'a> {
    pub now: OffsetDateTime,
    pub entity_type: &'a str,
    pub bundle: &'a str,
    pub field_name: &'a str,
}

/// Expand every known token in `template`.
pub fn expand(template: &str, ctx: &TokenContext<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find(']') else {
            rest = after;
            break;
        };
        let token = &after[1..end];
        match replacement(token, ctx) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&after[..=end]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    out
}

fn replacement(token: &str, ctx: &TokenContext<'_>) -> Option<String> {
    match token {
        "entity:type" => Some(ctx.entity_type.to_string()),
        "entity:bundle" => Some(ctx.bundle.to_string()),
        "field:name" => Some(ctx.field_name.to_string()),
        _ => token
            .strip_prefix("date:custom:")
            .and_then(|fmt| format_date(fmt, ctx.now)),
    }
}

/// Format `now` using a small subset of PHP-style date characters:
/// `Y` year, `m` month, `d` day, `H` hour, `i` minute, `s` second.
/// Any other character is copied literally.
fn format_date(fmt: &str, now: OffsetDateTime) -> Option<String> {
    if fmt.is_empty() {
        return None;
    }
    let mut out = String::new();
    for c in fmt.chars() {
        match c {
            'Y' => out.push_str(&format!("{:04}", now.year())),
            'm' => out.push_str(&format!("{:02}", u8::from(now.month()))),
            'd' => out.push_str(&format!("{:02}", now.day())),
            'H' => out.push_str(&format!("{:02}", now.hour())),
            'i' => out.push_str(&format!("{:02}", now.minute())),
            's' => out.push_str(&format!("{:02}", now.second())),
            other => out.push(other),
        }
    }
    Some(out)
}

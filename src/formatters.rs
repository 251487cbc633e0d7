//! Display formatters
//!
//! Plain typed functions. The registry adapts them to template values;
//! nothing here knows about the template engine.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ViewError;

/// Scale of integers stored with four implied decimals (e.g. 123456 = 12.3456)
pub const PRECISION_4: u32 = 4;
/// Scale of integers stored with ten implied decimals
pub const PRECISION_10: u32 = 10;

// --- Numbers ---

/// Insert thousands separators into the integer part of a numeric string.
/// "1234567.891" -> "1,234,567.891"
pub fn format_commas(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, fraction) = match unsigned.find('.') {
        Some(i) => unsigned.split_at(i),
        None => (unsigned, ""),
    };

    let digits = int_part.chars().count();
    let mut grouped = String::with_capacity(int_part.len() + digits / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}{}", sign, grouped, fraction)
}

/// Round half away from zero to `decimals` places, keep trailing zeros, add commas
pub fn decimal_display(value: Decimal, decimals: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);
    format_commas(&rounded.to_string())
}

/// Fixed-point integer display: 123456 at scale 4 to 2 decimals -> "12.35"
pub fn fixed_point_display(number: i64, scale: u32, decimals: u32) -> String {
    decimal_display(Decimal::new(number, scale), decimals)
}

pub fn int_display0(number: i64) -> String {
    format_commas(&number.to_string())
}

/// Float stored with precision 4, shown with English digit grouping
pub fn float_display(number: f64, decimals: usize) -> String {
    format_commas(&format!("{:.*}", decimals, number / 10_000.0))
}

pub fn format2(value: f64) -> String {
    format!("{:.2}", value)
}

/// value / 10^precision, shown with `precision` decimals
pub fn precision_formatter(value: i64, precision: i64) -> String {
    precision_formatter_float(value as f64, precision)
}

pub fn precision_formatter_float(value: f64, precision: i64) -> String {
    let places = precision.clamp(0, 18) as u32;
    let amount = value / 10f64.powi(places as i32);
    format!("{:.*}", places as usize, amount)
}

pub fn plus_one(value: i64) -> i64 {
    value.wrapping_add(1)
}

pub fn add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

pub fn subtract(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}

pub fn multiply(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}

pub fn divide(a: i64, b: i64) -> f64 {
    a as f64 / b as f64
}

pub fn zero_pad(value: i64) -> String {
    format!("{:02}", value)
}

pub fn plus_one_zero_pad(value: i64) -> String {
    zero_pad(plus_one(value))
}

pub fn calc_tab_index(index: i64, num: i64, base: i64) -> i64 {
    index.wrapping_mul(base).wrapping_add(num)
}

/// 835 -> "08:35"
pub fn int64_to_time(value: i64) -> String {
    format!("{:02}:{:02}", value / 100, value % 100)
}

// --- Text ---

/// "2125551234" -> "(212) 555-1234"; anything that is not ten bytes long is returned unchanged
pub fn format_phone(number: &str) -> String {
    if number.len() == 10 && number.is_ascii() {
        format!("({}) {}-{}", &number[0..3], &number[3..6], &number[6..10])
    } else {
        number.to_string()
    }
}

/// Strip punctuation so the number works in a `tel:` link
pub fn prep_phone(number: &str) -> String {
    number
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | ' ' | '-' | ','))
        .collect()
}

/// Level 1 has no dashes, level 3 has two
pub fn dashes(level: i64) -> String {
    "\u{2014}".repeat(level.saturating_sub(1).max(0) as usize)
}

pub fn first_initial(name: &str) -> String {
    name.chars().next().map(String::from).unwrap_or_default()
}

pub fn to_uppercase(value: &str) -> String {
    value.to_uppercase()
}

pub fn to_lowercase(value: &str) -> String {
    value.to_lowercase()
}

/// Upper-case the first letter of every word; the rest is left as is
pub fn to_title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for ch in value.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = !(ch.is_alphanumeric() || ch == '_');
    }
    out
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes the text, then turns newlines into `<br />`
pub fn new_line_to_br(value: &str) -> String {
    escape_html(value).replace('\n', "<br />")
}

/// ("tag", ["a", "b"]) -> "&tag=a&tag=b"
pub fn array_to_qs(key: &str, values: &[String]) -> String {
    values.iter().map(|v| format!("&{}={}", key, v)).collect()
}

/// JSON that is safe to drop into a `<script>` block
pub fn script_safe_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

// --- Dates ---

/// The zero instant (0001-01-01) stands for "no date"
pub fn is_zero_time(value: &DateTime<Utc>) -> bool {
    value.year() <= 1
}

fn local(value: &DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    value.with_timezone(&tz)
}

/// 2006-01-02 15:04
pub fn full_date_time(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%Y-%m-%d %H:%M").to_string()
}

/// Jan 02 3:04pm
pub fn short_date_time(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%b %d %-I:%M%P").to_string()
}

/// January 02, 2006 at 3:04pm
pub fn date_time_formal(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%B %d, %Y at %-I:%M%P").to_string()
}

/// 3:04pm
pub fn time_format(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%-I:%M%P").to_string()
}

/// Monday, January 2, 2006
pub fn full_date_format(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%A, %B %-d, %Y").to_string()
}

/// 01/02/2006
pub fn display_date(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%m/%d/%Y").to_string()
}

/// 01/02/2006 03:04PM
pub fn display_date_time(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%m/%d/%Y %I:%M%p").to_string()
}

/// January 2006
pub fn date_format_display(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%B %Y").to_string()
}

pub fn date_month(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%b").to_string()
}

pub fn date_day(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).day().to_string()
}

pub fn date_year(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).year().to_string()
}

/// 2006-01-02
pub fn intl_date_display(value: &DateTime<Utc>, tz: Tz) -> String {
    local(value, tz).format("%Y-%m-%d").to_string()
}

pub fn morning_afternoon_evening(value: &DateTime<Utc>, tz: Tz) -> String {
    match local(value, tz).hour() {
        0..=11 => "morning",
        12..=16 => "afternoon",
        _ => "evening",
    }
    .to_string()
}

pub fn when_completed_display(value: &DateTime<Utc>, tz: Tz) -> String {
    format!("completed {}", date_format_display(value, tz))
}

pub fn when_revised_display(value: &DateTime<Utc>, tz: Tz) -> String {
    format!(", revised {}", date_format_display(value, tz))
}

pub fn is_today(value: &DateTime<Utc>, now: &DateTime<Utc>, tz: Tz) -> bool {
    local(value, tz).date_naive() == local(now, tz).date_naive()
}

/// strftime-style formatting; an invalid pattern is rejected instead of
/// panicking inside `Display`
pub fn format_date(value: &DateTime<Utc>, tz: Tz, pattern: &str) -> Result<String, ViewError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ViewError::InvalidArgument(format!(
            "invalid date format pattern: {}",
            pattern
        )));
    }
    Ok(local(value, tz).format_with_items(items.into_iter()).to_string())
}

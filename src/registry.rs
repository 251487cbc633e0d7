//! Formatter Registry - One Table, Many Templates
//!
//! Built once, never mutated, shared by `Arc` with every compiled unit.
//! Each entry is installed into a template environment both as a global
//! function and as a filter, so `{{ formatPhone(p) }}` and `{{ p|formatPhone }}`
//! call the same code that `FormatterRegistry::invoke` calls directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use minijinja::value::{from_args, ArgType, Rest, ValueKind};
use minijinja::{Environment, Error, ErrorKind, Value};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;

use crate::error::ViewError;
use crate::formatters as fmts;
use crate::hashing::canonical_json;

/// Timezone used by date helpers unless configured otherwise
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Uniform helper signature: positional template arguments in, value out
pub type Formatter = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

/// Source of "now" for `isToday`
pub type Clock = fn() -> DateTime<Utc>;

static GLOBAL: Lazy<Arc<FormatterRegistry>> = Lazy::new(|| Arc::new(FormatterRegistry::build()));

pub struct FormatterRegistry {
    entries: BTreeMap<&'static str, Formatter>,
    timezone: Tz,
    timezone_fell_back: bool,
}

impl FormatterRegistry {
    /// Registry with the default display timezone and the system clock
    pub fn build() -> Self {
        Self::build_with_timezone(DEFAULT_TIMEZONE)
    }

    pub fn build_with_timezone(timezone: &str) -> Self {
        Self::build_with(timezone, Utc::now)
    }

    /// An unknown timezone degrades to UTC instead of failing construction.
    pub fn build_with(timezone: &str, clock: Clock) -> Self {
        let (tz, fell_back) = match Tz::from_str(timezone) {
            Ok(tz) => (tz, false),
            Err(_) => {
                tracing::warn!(
                    timezone,
                    "display timezone could not be loaded; date helpers fall back to UTC"
                );
                (Tz::UTC, true)
            }
        };

        let mut registry = Self {
            entries: BTreeMap::new(),
            timezone: tz,
            timezone_fell_back: fell_back,
        };
        registry.register_dates(clock);
        registry.register_numbers();
        registry.register_text();
        registry.register_markup();

        tracing::debug!(helpers = registry.entries.len(), timezone = tz.name(), "formatter registry built");
        registry
    }

    /// Process-wide registry, built on first use
    pub fn global() -> Arc<FormatterRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn display_timezone(&self) -> Tz {
        self.timezone
    }

    /// True when the configured timezone was unknown and UTC is used instead
    pub fn timezone_fell_back(&self) -> bool {
        self.timezone_fell_back
    }

    /// Call a helper outside of any template
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, ViewError> {
        let helper = self
            .entries
            .get(name)
            .ok_or_else(|| ViewError::InvalidArgument(format!("unknown helper: {}", name)))?;
        helper(args).map_err(|e| ViewError::execution(format!("helper {}", name), e))
    }

    /// Register every entry as a function and as a filter
    pub fn install(&self, env: &mut Environment<'_>) {
        for (name, helper) in &self.entries {
            let call = Arc::clone(helper);
            env.add_function(*name, move |args: Rest<Value>| call(args.as_slice()));
            let pipe = Arc::clone(helper);
            env.add_filter(*name, move |args: Rest<Value>| pipe(args.as_slice()));
        }
    }

    fn add(&mut self, name: &'static str, helper: Formatter) {
        self.entries.insert(name, helper);
    }

    fn register_dates(&mut self, clock: Clock) {
        let tz = self.timezone;
        let views: [(&'static str, fn(&DateTime<Utc>, Tz) -> String); 16] = [
            ("fullDateTimeET", fmts::full_date_time),
            ("shortDateTime", fmts::short_date_time),
            ("dateTimeFormal", fmts::date_time_formal),
            ("timeFormat", fmts::time_format),
            ("fullDisplayDate", fmts::full_date_format),
            ("displayDate", fmts::display_date),
            ("displayDateTime", fmts::display_date_time),
            ("dateFormatDisplay", fmts::date_format_display),
            ("issueDateFormatDisplay", fmts::date_format_display),
            ("dateMonth", fmts::date_month),
            ("dateDay", fmts::date_day),
            ("dateYear", fmts::date_year),
            ("intlDateDisplay", fmts::intl_date_display),
            ("displayMorningAfternoonEvening", fmts::morning_afternoon_evening),
            ("whenCompletedDisplay", fmts::when_completed_display),
            ("whenRevisedDisplay", fmts::when_revised_display),
        ];
        for (name, view) in views {
            self.add(name, in_zone(tz, view));
        }

        self.add("fullDateFormat", zoned(fmts::full_date_format));
        self.add("timeFormatAmPm", zoned(fmts::time_format));
        self.add(
            "formatDate",
            Arc::new(|args: &[Value]| -> Result<Value, Error> {
                let (value, zone, pattern): (Value, String, String) = from_args(args)?;
                let tz = parse_zone(&zone)?;
                date_or_blank(&value, |t| fmts::format_date(t, tz, &pattern).map_err(helper_error))
            }),
        );
        self.add(
            "formatDateUTC",
            Arc::new(|args: &[Value]| -> Result<Value, Error> {
                let (value, pattern): (Value, String) = from_args(args)?;
                date_or_blank(&value, |t| {
                    fmts::format_date(t, Tz::UTC, &pattern).map_err(helper_error)
                })
            }),
        );
        self.add(
            "isToday",
            Arc::new(move |args: &[Value]| -> Result<Value, Error> {
                let (value,): (Value,) = from_args(args)?;
                Ok(Value::from(match moment(&value)? {
                    Some(t) => fmts::is_today(&t, &clock(), tz),
                    None => false,
                }))
            }),
        );
    }

    fn register_numbers(&mut self) {
        for (name, decimals) in [("int64Display0", 0), ("int64Display2", 2), ("int64Display3", 3)] {
            self.add(
                name,
                unary(move |n: i64| fmts::fixed_point_display(n, fmts::PRECISION_4, decimals)),
            );
        }
        self.add(
            "int64Display2FromPrecision10",
            unary(|n: i64| fmts::fixed_point_display(n, fmts::PRECISION_10, 2)),
        );
        for (name, decimals) in [("float64Display0", 0), ("float64Display2", 2), ("float64Display3", 3)] {
            self.add(name, unary(move |n: f64| fmts::float_display(n, decimals)));
        }
        for (name, decimals) in [("decimalDisplay0", 0), ("decimalDisplay2", 2), ("decimalDisplay3", 3)] {
            self.add(
                name,
                Arc::new(move |args: &[Value]| -> Result<Value, Error> {
                    let (value,): (Value,) = from_args(args)?;
                    Ok(Value::from(fmts::decimal_display(decimal(&value)?, decimals)))
                }),
            );
        }
        self.add("intDisplay0", unary(fmts::int_display0));
        self.add("format2", unary(fmts::format2));
        self.add("precisionFormatter", binary(fmts::precision_formatter));
        self.add("precisionFormatterFloat64", binary(fmts::precision_formatter_float));
        self.add("plusOne", unary(fmts::plus_one));
        self.add("plusOne64", unary(fmts::plus_one));
        self.add("add", binary(fmts::add));
        self.add("subtract", binary(fmts::subtract));
        self.add("multiply", binary(fmts::multiply));
        self.add("divide", binary(fmts::divide));
        self.add("plusOneZeroPad", unary(fmts::plus_one_zero_pad));
        self.add("zeroPad", unary(fmts::zero_pad));
        self.add("zeroPad64", unary(fmts::zero_pad));
        self.add("calcTabIndex", ternary(fmts::calc_tab_index));
        self.add("int64ToTime", unary(fmts::int64_to_time));
    }

    fn register_text(&mut self) {
        self.add("formatPhone", unary(|s: String| fmts::format_phone(&s)));
        self.add("prepPhone", unary(|s: String| fmts::prep_phone(&s)));
        self.add("dashes", unary(fmts::dashes));
        self.add("firstInitial", unary(|s: String| fmts::first_initial(&s)));
        self.add("toUppercase", unary(|s: String| fmts::to_uppercase(&s)));
        self.add("toLowercase", unary(|s: String| fmts::to_lowercase(&s)));
        self.add("toTitleCase", unary(|s: String| fmts::to_title_case(&s)));
        self.add(
            "arrayToQS",
            binary(|key: String, values: Vec<String>| fmts::array_to_qs(&key, &values)),
        );
        self.add("dict", Arc::new(|args: &[Value]| dict(args)));
    }

    /// Helpers whose result bypasses autoescaping. Callers own the trust
    /// decision for `safe` and `htmlEscape`.
    fn register_markup(&mut self) {
        self.add("safe", unary(Value::from_safe_string));
        self.add("htmlEscape", unary(Value::from_safe_string));
        self.add(
            "newLineToBR",
            unary(|s: String| Value::from_safe_string(fmts::new_line_to_br(&s))),
        );
        self.add(
            "marshal",
            Arc::new(|args: &[Value]| -> Result<Value, Error> {
                let (value,): (Value,) = from_args(args)?;
                let json = canonical_json(&value).map_err(|e| {
                    Error::new(ErrorKind::BadSerialization, "value cannot be marshalled").with_source(e)
                })?;
                Ok(Value::from_safe_string(fmts::script_safe_json(&json)))
            }),
        );
    }
}

impl fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("helpers", &self.entries.keys().collect::<Vec<_>>())
            .field("timezone", &self.timezone)
            .field("timezone_fell_back", &self.timezone_fell_back)
            .finish()
    }
}

// --- Adapters from typed functions to the uniform signature ---

fn unary<A, R, F>(f: F) -> Formatter
where
    A: for<'a> ArgType<'a, Output = A> + 'static,
    R: Into<Value>,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Arc::new(move |args: &[Value]| -> Result<Value, Error> {
        let (a,): (A,) = from_args(args)?;
        Ok(f(a).into())
    })
}

fn binary<A, B, R, F>(f: F) -> Formatter
where
    A: for<'a> ArgType<'a, Output = A> + 'static,
    B: for<'a> ArgType<'a, Output = B> + 'static,
    R: Into<Value>,
    F: Fn(A, B) -> R + Send + Sync + 'static,
{
    Arc::new(move |args: &[Value]| -> Result<Value, Error> {
        let (a, b): (A, B) = from_args(args)?;
        Ok(f(a, b).into())
    })
}

fn ternary<A, B, C, R, F>(f: F) -> Formatter
where
    A: for<'a> ArgType<'a, Output = A> + 'static,
    B: for<'a> ArgType<'a, Output = B> + 'static,
    C: for<'a> ArgType<'a, Output = C> + 'static,
    R: Into<Value>,
    F: Fn(A, B, C) -> R + Send + Sync + 'static,
{
    Arc::new(move |args: &[Value]| -> Result<Value, Error> {
        let (a, b, c): (A, B, C) = from_args(args)?;
        Ok(f(a, b, c).into())
    })
}

/// Date view in the registry's display timezone
fn in_zone(tz: Tz, view: fn(&DateTime<Utc>, Tz) -> String) -> Formatter {
    Arc::new(move |args: &[Value]| -> Result<Value, Error> {
        let (value,): (Value,) = from_args(args)?;
        date_or_blank(&value, |t| Ok(view(t, tz)))
    })
}

/// Date view with the zone name passed by the template
fn zoned(view: fn(&DateTime<Utc>, Tz) -> String) -> Formatter {
    Arc::new(move |args: &[Value]| -> Result<Value, Error> {
        let (value, zone): (Value, String) = from_args(args)?;
        let tz = parse_zone(&zone)?;
        date_or_blank(&value, |t| Ok(view(t, tz)))
    })
}

fn date_or_blank<F>(value: &Value, render: F) -> Result<Value, Error>
where
    F: FnOnce(&DateTime<Utc>) -> Result<String, Error>,
{
    match moment(value)? {
        Some(t) => render(&t).map(Value::from),
        None => Ok(Value::from("")),
    }
}

/// Interpret a template value as an instant. RFC 3339 strings, `YYYY-MM-DD`
/// dates and Unix seconds are accepted; absent, empty and zero dates are `None`.
fn moment(value: &Value) -> Result<Option<DateTime<Utc>>, Error> {
    let parsed = match value.kind() {
        ValueKind::Undefined | ValueKind::None => return Ok(None),
        ValueKind::String => {
            let text = value.as_str().unwrap_or_default().trim();
            if text.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|d| Utc.from_utc_datetime(&d))
                })
        }
        ValueKind::Number => i64::try_from(value.clone())
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    };

    match parsed {
        Some(t) if fmts::is_zero_time(&t) => Ok(None),
        Some(t) => Ok(Some(t)),
        None => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot interpret {} as a date", value),
        )),
    }
}

fn decimal(value: &Value) -> Result<Decimal, Error> {
    let parsed = match value.kind() {
        ValueKind::String => Decimal::from_str(value.as_str().unwrap_or_default().trim()).ok(),
        ValueKind::Number => match i64::try_from(value.clone()) {
            Ok(n) => Some(Decimal::from(n)),
            Err(_) => f64::try_from(value.clone())
                .ok()
                .and_then(|f| Decimal::try_from(f).ok()),
        },
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot interpret {} as a decimal", value),
        )
    })
}

fn parse_zone(zone: &str) -> Result<Tz, Error> {
    Tz::from_str(zone).map_err(|_| {
        helper_error(ViewError::InvalidArgument(format!("unknown timezone: {}", zone)))
    })
}

fn helper_error(err: ViewError) -> Error {
    Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err)
}

/// `dict("a", 1, "b", 2)` builds a map from alternating keys and values.
/// A single keyword-argument map is returned as is.
fn dict(args: &[Value]) -> Result<Value, Error> {
    if let [single] = args {
        if single.kind() == ValueKind::Map {
            return Ok(single.clone());
        }
    }
    if args.len() % 2 != 0 {
        return Err(helper_error(ViewError::InvalidArgument(
            "invalid dict call: expected key/value pairs".to_string(),
        )));
    }

    let mut map = BTreeMap::new();
    for pair in args.chunks(2) {
        let key = pair[0].as_str().ok_or_else(|| {
            helper_error(ViewError::InvalidArgument(
                "dict keys must be strings".to_string(),
            ))
        })?;
        map.insert(key.to_string(), pair[1].clone());
    }
    Ok(Value::from_serialize(&map))
}

//! The global catalog visible to every script.
//!
//! Names here are a compatibility surface: removing or renaming one requires
//! bumping [`VERSION`].

use chrono::Utc;
use rand::Rng;

use crate::context::Context;
use crate::embed::rich_embed;
use crate::entities::{
    resolve_channel, resolve_emoji, resolve_member, resolve_message, resolve_role,
};
use crate::error::ScriptError;
use crate::numeric::{parse_float_prefix, parse_int_prefix, round_half_up};
use crate::storage;
use crate::time::{
    duration_from_ms, duration_ms, duration_unit_ms, parse_human_duration, parse_iso_duration,
    parse_time, parse_time_with_format, since_at, time_from_components, time_from_ms,
    to_human_duration, until_at, DAY_MS, HOUR_MS, MINUTE_MS, SECOND_MS,
};
use crate::value::{Literal, NativeFunction};

/// Catalog version.
pub const VERSION: &str = "1";

type Global = (&'static str, Literal);

fn native<F>(name: &'static str, f: F) -> Global
where
    F: Fn(&Context, &[Literal]) -> Result<Literal, ScriptError> + Send + Sync + 'static,
{
    (name, Literal::Function(NativeFunction::sync(name, f)))
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> Global {
    native(name, move |_, args| Ok(Literal::Number(f(num(args, 0)))))
}

fn constant(name: &'static str, n: f64) -> Global {
    (name, Literal::Number(n))
}

/// Argument `i` coerced to a number; a missing argument is NaN.
fn num(args: &[Literal], i: usize) -> f64 {
    args.get(i).map(Literal::to_number).unwrap_or(f64::NAN)
}

fn boolean(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::Boolean(args.first().is_some_and(Literal::to_boolean)))
}

fn number(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::Number(args.first().map(Literal::to_number).unwrap_or(0.0)))
}

fn string(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::String(
        args.first().map(Literal::to_script_string).unwrap_or_default(),
    ))
}

fn array(ctx: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let Some(Literal::Number(n)) = args.first() else {
        return Ok(Literal::array([]));
    };
    let max = ctx.limits().max_array_length;
    if *n < 0.0 || n.fract() != 0.0 || *n > max as f64 {
        return Err(ctx.error(format!("Invalid array length (maximum {max})"), Some(0)));
    }
    Ok(Literal::array(std::iter::repeat(Literal::Null).take(*n as usize)))
}

fn parse_number(ctx: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let text = args.first().and_then(Literal::as_str);
    let n = match args.get(1) {
        Some(Literal::Number(radix)) => {
            if !(2.0..=36.0).contains(radix) {
                return Err(ctx.error("Radix argument must be between 2 and 36", Some(1)));
            }
            text.map(|s| parse_int_prefix(s, radix.trunc() as u32)).unwrap_or(f64::NAN)
        }
        _ => text.map(parse_float_prefix).unwrap_or(f64::NAN),
    };
    Ok(Literal::Number(n))
}

fn round(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let Some(Literal::Number(n)) = args.first() else {
        return Ok(Literal::Number(f64::NAN));
    };
    let rounded = match args.get(1) {
        Some(Literal::Null) | None => round_half_up(*n),
        Some(precision) => {
            let scale = 10f64.powf(precision.to_number());
            round_half_up(n * scale) / scale
        }
    };
    Ok(Literal::Number(rounded))
}

fn hypot(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let values: Vec<f64> = args.iter().map(Literal::to_number).collect();
    if values.iter().any(|v| v.is_infinite()) {
        return Ok(Literal::Number(f64::INFINITY));
    }
    Ok(Literal::Number(values.iter().map(|v| v * v).sum::<f64>().sqrt()))
}

fn max(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let mut acc = f64::NEG_INFINITY;
    for v in args.iter().map(Literal::to_number) {
        if v.is_nan() {
            return Ok(Literal::Number(f64::NAN));
        }
        acc = acc.max(v);
    }
    Ok(Literal::Number(acc))
}

fn min(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let mut acc = f64::INFINITY;
    for v in args.iter().map(Literal::to_number) {
        if v.is_nan() {
            return Ok(Literal::Number(f64::NAN));
        }
        acc = acc.min(v);
    }
    Ok(Literal::Number(acc))
}

fn uniform(start: f64, end: f64) -> f64 {
    rand::thread_rng().gen::<f64>() * (end - start) + start
}

fn random(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let value = match args {
        [] => Literal::Number(uniform(0.0, 1.0)),
        [Literal::Number(n)] => Literal::Number(uniform(0.0, *n)),
        [Literal::Array(items)] => {
            if items.is_empty() {
                Literal::Null
            } else {
                items.get(rand::thread_rng().gen_range(0..items.len()))
            }
        }
        [_] => Literal::Number(uniform(0.0, 1.0)),
        [a, b, ..] => {
            let (start, end) = (a.to_number(), b.to_number());
            if a == b || start == end {
                Literal::Number(start)
            } else {
                Literal::Number(uniform(start, end))
            }
        }
    };
    Ok(value)
}

fn time(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let parsed = match args {
        [] | [Literal::Null] => Some(Utc::now()),
        [Literal::Time(t)] => Some(*t),
        [Literal::Number(ms)] => time_from_ms(*ms),
        [Literal::String(s)] => parse_time(s),
        [Literal::Array(parts)] => {
            let parts: Vec<f64> = parts.to_vec().iter().map(Literal::to_number).collect();
            time_from_components(&parts)
        }
        [Literal::String(s), Literal::String(format)] => parse_time_with_format(s, format),
        [Literal::String(s), Literal::Array(formats)] => formats
            .to_vec()
            .iter()
            .filter_map(Literal::as_str)
            .find_map(|format| parse_time_with_format(s, format)),
        _ => Some(Utc::now()),
    };
    Ok(parsed.map(Literal::Time).unwrap_or(Literal::Null))
}

fn now(_: &Context, _: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::Number(Utc::now().timestamp_millis() as f64))
}

fn duration(ctx: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let zero = chrono::Duration::zero();
    let d = match args {
        [Literal::Duration(d)] => *d,
        [Literal::Number(ms)] => duration_from_ms(*ms).unwrap_or(zero),
        [Literal::String(s)] => parse_iso_duration(s).unwrap_or(zero),
        [Literal::Number(n), Literal::String(unit)] => {
            let unit_ms = duration_unit_ms(unit)
                .ok_or_else(|| ctx.error(format!("Unknown duration unit '{unit}'"), Some(1)))?;
            duration_from_ms(n * unit_ms as f64).unwrap_or(zero)
        }
        _ => zero,
    };
    Ok(Literal::Duration(d))
}

fn parse_human(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let parsed = args
        .first()
        .and_then(Literal::as_str)
        .and_then(parse_human_duration)
        .and_then(duration_from_ms);
    Ok(parsed.map(Literal::Duration).unwrap_or(Literal::Number(f64::NAN)))
}

fn to_human(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    let ms = match args.first() {
        Some(Literal::Number(n)) => *n,
        Some(Literal::Duration(d)) => duration_ms(*d),
        _ => return Ok(Literal::String(String::new())),
    };
    Ok(Literal::String(to_human_duration(ms)))
}

fn since(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::Duration(match args.first() {
        Some(Literal::Time(t)) => since_at(*t, Utc::now()),
        _ => chrono::Duration::zero(),
    }))
}

fn until(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(Literal::Duration(match args.first() {
        Some(Literal::Time(t)) => until_at(*t, Utc::now()),
        _ => chrono::Duration::zero(),
    }))
}

fn storage_accessor(_: &Context, args: &[Literal]) -> Result<Literal, ScriptError> {
    Ok(match args.first() {
        Some(Literal::String(ns)) => storage::accessor(ns),
        _ => Literal::Null,
    })
}

async fn pad(ctx: Context, args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let width = match args.get(1) {
        Some(Literal::Number(w)) => *w,
        _ => return Err(ctx.error("parameter >length< must be a Number", Some(1))),
    };
    let value = match args.first() {
        Some(v) => v.to_display_string(&ctx).await?,
        None => String::new(),
    };
    let fill = match args.get(2) {
        Some(f) => f.to_display_string(&ctx).await?,
        None => "0".to_string(),
    };

    let len = value.chars().count();
    if !width.is_finite() || width <= len as f64 || fill.is_empty() {
        return Ok(Literal::String(value));
    }
    let repeats = width as usize - len;
    let total = repeats.saturating_mul(fill.chars().count()).saturating_add(len);
    if total > ctx.limits().max_string_length {
        return Err(ctx.error("Padded string would exceed the maximum string length", Some(1)));
    }
    Ok(Literal::String(format!("{}{value}", fill.repeat(repeats))))
}

fn entity<F, Fut>(name: &'static str, resolve: F) -> Global
where
    F: Fn(Context, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Literal, ScriptError>> + Send + 'static,
{
    let func = NativeFunction::new(name, move |ctx, args: Vec<Literal>| {
        let id = match args.into_iter().next() {
            Some(Literal::String(id)) => Some(id),
            _ => None,
        };
        let fut = id.map(|id| resolve(ctx, id));
        async move {
            match fut {
                Some(fut) => fut.await,
                None => Ok(Literal::Null),
            }
        }
    });
    (name, Literal::Function(func))
}

/// Every global, by name.
pub fn catalog() -> Vec<(&'static str, Literal)> {
    vec![
        ("VERSION", Literal::from(VERSION)),
        native("Boolean", boolean),
        native("Number", number),
        native("String", string),
        native("Array", array),
        native("Object", |_, _| Ok(Literal::object(Vec::<(String, Literal)>::new()))),
        constant("MAX_SAFE_INTEGER", 9_007_199_254_740_991.0),
        constant("MIN_SAFE_INTEGER", -9_007_199_254_740_991.0),
        constant("MIN_SAFE_DIFFERENCE", f64::EPSILON),
        constant("NaN", f64::NAN),
        constant("Infinity", f64::INFINITY),
        constant("E", std::f64::consts::E),
        constant("LN2", std::f64::consts::LN_2),
        constant("LN10", std::f64::consts::LN_10),
        constant("LOG2E", std::f64::consts::LOG2_E),
        constant("LOG10E", std::f64::consts::LOG10_E),
        constant("SQRT1_2", std::f64::consts::FRAC_1_SQRT_2),
        constant("SQRT2", std::f64::consts::SQRT_2),
        constant("PI", std::f64::consts::PI),
        native("isNaN", |_, args| Ok(Literal::Boolean(num(args, 0).is_nan()))),
        native("isFinite", |_, args| Ok(Literal::Boolean(num(args, 0).is_finite()))),
        native("parseNumber", parse_number),
        unary("floor", f64::floor),
        unary("ceil", f64::ceil),
        native("round", round),
        unary("exp", f64::exp),
        unary("abs", f64::abs),
        unary("acos", f64::acos),
        unary("cos", f64::cos),
        unary("acosh", f64::acosh),
        unary("cosh", f64::cosh),
        unary("asin", f64::asin),
        unary("sin", f64::sin),
        unary("asinh", f64::asinh),
        unary("sinh", f64::sinh),
        unary("atan", f64::atan),
        unary("tan", f64::tan),
        unary("atanh", f64::atanh),
        unary("tanh", f64::tanh),
        native("atan2", |_, args| Ok(Literal::Number(num(args, 0).atan2(num(args, 1))))),
        unary("cbrt", f64::cbrt),
        unary("sqrt", f64::sqrt),
        native("hypot", hypot),
        unary("log", f64::ln),
        unary("log10", f64::log10),
        unary("log2", f64::log2),
        native("max", max),
        native("min", min),
        native("random", random),
        ("pad", Literal::Function(NativeFunction::new("pad", pad))),
        native("Time", time),
        native("now", now),
        native("Duration", duration),
        native("RichEmbed", |_, _| Ok(rich_embed())),
        entity("Emoji", |ctx, id| async move { resolve_emoji(&ctx, &id).await }),
        entity("Message", |ctx, id| async move { resolve_message(&ctx, &id).await }),
        entity("Role", |ctx, id| async move { resolve_role(&ctx, &id).await }),
        entity("Member", |ctx, id| async move { resolve_member(&ctx, &id).await }),
        entity("Channel", |ctx, id| async move { resolve_channel(&ctx, &id).await }),
        native("storage", storage_accessor),
        native("parseHumanDuration", parse_human),
        native("toHumanDuration", to_human),
        native("since", since),
        native("until", until),
        constant("MILLISECOND", 1.0),
        constant("SECOND", SECOND_MS as f64),
        constant("MINUTE", MINUTE_MS as f64),
        constant("HOUR", HOUR_MS as f64),
        constant("DAY", DAY_MS as f64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use crate::{CapabilityBridge, HostError, Runtime, RuntimeLimits};
    use serde_json::Value;
    use std::sync::Arc;

    struct NoBridge;

    #[async_trait::async_trait]
    impl CapabilityBridge for NoBridge {
        async fn request(&self, method: &str, _payload: Value) -> Result<Value, HostError> {
            Err(HostError::Remote {
                method: method.into(),
                message: "no host in unit tests".into(),
            })
        }
    }

    fn ctx() -> Context {
        Runtime::new(
            Arc::new(NoBridge),
            Arc::new(MemoryDocumentStore::new()),
            RuntimeLimits::default(),
        )
        .begin("g1")
    }

    fn global(name: &str) -> NativeFunction {
        match catalog().into_iter().find(|(n, _)| *n == name) {
            Some((_, Literal::Function(f))) => f,
            _ => panic!("no native global named {name}"),
        }
    }

    async fn call(name: &str, args: Vec<Literal>) -> Result<Literal, ScriptError> {
        global(name).call(ctx(), args).await
    }

    #[test]
    fn catalog_names_are_unique() {
        let names: Vec<&str> = catalog().iter().map(|(n, _)| *n).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
        assert!(names.contains(&"VERSION"));
        assert!(names.contains(&"parseHumanDuration"));
    }

    #[tokio::test]
    async fn coercions_follow_truth_table() {
        assert_eq!(
            call("Boolean", vec![Literal::Number(0.0)]).await.unwrap(),
            Literal::Boolean(false)
        );
        assert_eq!(
            call("Boolean", vec![Literal::Number(0.0001)]).await.unwrap(),
            Literal::Boolean(true)
        );
        assert_eq!(
            call("Boolean", vec![Literal::from("false")]).await.unwrap(),
            Literal::Boolean(false)
        );
        assert_eq!(call("Number", vec![]).await.unwrap(), Literal::Number(0.0));
        assert_eq!(
            call("Number", vec![Literal::Boolean(true)]).await.unwrap(),
            Literal::Number(1.0)
        );
        assert_eq!(call("String", vec![Literal::Number(2.5)]).await.unwrap(), Literal::from("2.5"));
    }

    #[tokio::test]
    async fn array_allocates_null_slots() {
        let arr = call("Array", vec![Literal::Number(3.0)]).await.unwrap();
        match arr {
            Literal::Array(items) => {
                assert_eq!(items.len(), 3);
                assert!(items.get(0).is_null());
            }
            other => panic!("expected Array, got {other:?}"),
        }
        match call("Array", vec![Literal::from("3")]).await.unwrap() {
            Literal::Array(items) => assert!(items.is_empty()),
            other => panic!("expected Array, got {other:?}"),
        }
        assert!(call("Array", vec![Literal::Number(-1.0)]).await.is_err());
        assert!(call("Array", vec![Literal::Number(1e12)]).await.is_err());
    }

    #[tokio::test]
    async fn parse_number_checks_radix() {
        assert_eq!(
            call("parseNumber", vec![Literal::from("12.5px")]).await.unwrap(),
            Literal::Number(12.5)
        );
        assert_eq!(
            call("parseNumber", vec![Literal::from("ff"), Literal::Number(16.0)]).await.unwrap(),
            Literal::Number(255.0)
        );
        let err = call("parseNumber", vec![Literal::from("1"), Literal::Number(37.0)])
            .await
            .unwrap_err();
        assert_eq!(err.message, "Radix argument must be between 2 and 36");
    }

    #[tokio::test]
    async fn round_with_precision() {
        assert_eq!(call("round", vec![Literal::Number(2.5)]).await.unwrap(), Literal::Number(3.0));
        assert_eq!(
            call("round", vec![Literal::Number(1.2345), Literal::Number(2.0)]).await.unwrap(),
            Literal::Number(1.23)
        );
        let nan = call("round", vec![Literal::from("x")]).await.unwrap();
        assert!(nan.as_number().unwrap().is_nan());
    }

    #[tokio::test]
    async fn max_and_min_are_numeric() {
        let args = vec![Literal::Number(3.0), Literal::Number(10.0), Literal::Number(-2.0)];
        assert_eq!(call("max", args.clone()).await.unwrap(), Literal::Number(10.0));
        assert_eq!(call("min", args).await.unwrap(), Literal::Number(-2.0));
        assert_eq!(call("max", vec![]).await.unwrap(), Literal::Number(f64::NEG_INFINITY));
        let nan = call("min", vec![Literal::Number(1.0), Literal::Number(f64::NAN)]).await.unwrap();
        assert!(nan.as_number().unwrap().is_nan());
    }

    #[tokio::test]
    async fn random_degenerate_cases() {
        for _ in 0..100 {
            assert_eq!(
                call("random", vec![Literal::Number(5.0), Literal::Number(5.0)]).await.unwrap(),
                Literal::Number(5.0)
            );
            assert_eq!(
                call("random", vec![Literal::array([Literal::from("x")])]).await.unwrap(),
                Literal::from("x")
            );
            let n = call("random", vec![Literal::Number(10.0)]).await.unwrap().as_number().unwrap();
            assert!((0.0..10.0).contains(&n));
        }
        assert!(call("random", vec![Literal::array([])]).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn pad_left_fills() {
        assert_eq!(
            call("pad", vec![Literal::Number(7.0), Literal::Number(3.0)]).await.unwrap(),
            Literal::from("007")
        );
        assert_eq!(
            call("pad", vec![Literal::from("ab"), Literal::Number(5.0), Literal::from("-")])
                .await
                .unwrap(),
            Literal::from("---ab")
        );
        assert_eq!(
            call("pad", vec![Literal::from("long"), Literal::Number(2.0)]).await.unwrap(),
            Literal::from("long")
        );
        let err = call("pad", vec![Literal::from("x"), Literal::from("3")]).await.unwrap_err();
        assert_eq!(err.message, "parameter >length< must be a Number");
        assert!(call("pad", vec![Literal::from("x"), Literal::Number(1e12)]).await.is_err());
    }

    #[tokio::test]
    async fn time_constructor_overloads() {
        let t = call("Time", vec![Literal::Number(86_400_000.0)]).await.unwrap();
        let from_string = call("Time", vec![Literal::from("1970-01-02T00:00:00Z")]).await.unwrap();
        assert_eq!(t, from_string);
        let from_parts = call(
            "Time",
            vec![Literal::array([
                Literal::Number(1970.0),
                Literal::Number(0.0),
                Literal::Number(2.0),
            ])],
        )
        .await
        .unwrap();
        assert_eq!(t, from_parts);
        let formatted = call("Time", vec![Literal::from("02/01/1970"), Literal::from("DD/MM/YYYY")])
            .await
            .unwrap();
        assert_eq!(t, formatted);
        let any_format = call(
            "Time",
            vec![
                Literal::from("1970.01.02"),
                Literal::array([Literal::from("DD/MM/YYYY"), Literal::from("YYYY.MM.DD")]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(t, any_format);
        assert!(call("Time", vec![Literal::from("not a date")]).await.unwrap().is_null());
        assert!(matches!(call("Time", vec![]).await.unwrap(), Literal::Time(_)));
        let huge = Literal::array([Literal::Number(2020.0), Literal::Number(1e300)]);
        assert!(call("Time", vec![huge]).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn duration_constructor_overloads() {
        let minute = Literal::Duration(chrono::Duration::minutes(1));
        assert_eq!(call("Duration", vec![Literal::Number(60_000.0)]).await.unwrap(), minute);
        assert_eq!(call("Duration", vec![Literal::from("PT1M")]).await.unwrap(), minute);
        assert_eq!(
            call("Duration", vec![Literal::Number(1.0), Literal::from("minutes")]).await.unwrap(),
            minute
        );
        assert_eq!(call("Duration", vec![minute.clone()]).await.unwrap(), minute);
        assert_eq!(
            call("Duration", vec![]).await.unwrap(),
            Literal::Duration(chrono::Duration::zero())
        );
        let bad_unit = call("Duration", vec![Literal::Number(1.0), Literal::from("parsecs")]).await;
        assert!(bad_unit.is_err());
        assert_eq!(
            call("Duration", vec![Literal::from("9999999999999.00:00")]).await.unwrap(),
            Literal::Duration(chrono::Duration::zero())
        );
    }

    #[tokio::test]
    async fn human_duration_roundtrip() {
        let d = Literal::Duration(chrono::Duration::minutes(90));
        let phrase = call("toHumanDuration", vec![d.clone()]).await.unwrap();
        assert_eq!(phrase, Literal::from("1h 30m"));
        assert_eq!(call("parseHumanDuration", vec![phrase]).await.unwrap(), d);
        let bad = call("parseHumanDuration", vec![Literal::Number(5.0)]).await.unwrap();
        assert!(bad.as_number().unwrap().is_nan());
        assert_eq!(call("toHumanDuration", vec![Literal::Null]).await.unwrap(), Literal::from(""));
    }

    #[tokio::test]
    async fn since_and_until_on_non_time_are_zero() {
        let zero = Literal::Duration(chrono::Duration::zero());
        assert_eq!(call("since", vec![Literal::Number(1.0)]).await.unwrap(), zero);
        assert_eq!(call("until", vec![]).await.unwrap(), zero);
    }

    #[tokio::test]
    async fn entity_constructors_require_a_string() {
        assert!(call("Channel", vec![Literal::Number(123.0)]).await.unwrap().is_null());
        assert!(call("Member", vec![]).await.unwrap().is_null());
        assert!(call("storage", vec![Literal::Number(1.0)]).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn entity_lookup_failure_is_a_script_error() {
        let err = call("Role", vec![Literal::from("1")]).await.unwrap_err();
        assert_eq!(err.message, "Couldn't get role.");
    }
}

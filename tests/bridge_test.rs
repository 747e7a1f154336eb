mod test;

use bytes::Bytes;
use ludis::{LogLevel, Reply, ReplyError, Runtime};
use std::sync::Arc;
use test::{bulk, engine_with, error, status, StubHost};

#[test]
fn call_routes_to_the_host() {
    let host = StubHost::new();
    host.push(Ok(status(b"PONG")));
    let mut engine = engine_with(host.clone());

    assert_eq!(engine.eval(b"return redis.call('PING')"), status(b"PONG"));
    assert_eq!(host.calls(), vec![vec![Bytes::from_static(b"PING")]]);
}

#[test]
fn call_coerces_arguments() {
    let host = StubHost::new();
    let mut engine = engine_with(host.clone());

    engine.eval(b"redis.call('SET', 'k', 3, 2.5, true, false)");
    assert_eq!(
        host.calls(),
        vec![vec![
            Bytes::from_static(b"SET"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"3"),
            Bytes::from_static(b"2.5"),
            Bytes::from_static(b"1"),
            Bytes::from_static(b"0"),
        ]]
    );
}

#[test]
fn call_errors_terminate_the_script() {
    let host = StubHost::new();
    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR boom"))));
    let mut engine = engine_with(host.clone());

    assert_eq!(
        engine.eval(b"redis.call('THROW') return 'unreached'"),
        error(b"ERR boom")
    );
}

#[test]
fn call_errors_are_catchable_with_exact_payloads() {
    let host = StubHost::new();
    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR boom"))));
    let mut engine = engine_with(host.clone());

    assert_eq!(
        engine.eval(b"local ok, e = pcall(redis.call, 'THROW') return e"),
        bulk(b"ERR boom")
    );
}

#[test]
fn pcall_returns_error_tables() {
    let host = StubHost::new();
    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR boom"))));
    let mut engine = engine_with(host.clone());

    // The {err=...} table re-encodes as an Error reply at script return.
    assert_eq!(engine.eval(b"return redis.pcall('THROW')"), error(b"ERR boom"));

    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR boom"))));
    assert_eq!(
        engine.eval(b"return redis.pcall('THROW').err"),
        bulk(b"ERR boom")
    );
}

#[test]
fn pcall_lets_the_script_continue() {
    let host = StubHost::new();
    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR down"))));
    host.push(Ok(Reply::Int(7)));
    let mut engine = engine_with(host.clone());

    assert_eq!(
        engine.eval(b"redis.pcall('A') return redis.call('B')"),
        Reply::Int(7)
    );
}

#[test]
fn reply_shapes_decode() {
    let host = StubHost::new();
    host.push(Ok(Reply::Array(vec![
        Reply::Null,
        Reply::Int(3),
        bulk(b"x"),
        status(b"OK"),
    ])));
    let mut engine = engine_with(host.clone());

    let script = b"\
local r = redis.call('MIXED')
return {type(r[1]), r[2], r[3], r[4].ok}";
    assert_eq!(
        engine.eval(script),
        Reply::Array(vec![
            bulk(b"nil"),
            Reply::Int(3),
            bulk(b"x"),
            bulk(b"OK"),
        ])
    );
}

#[test]
fn nested_errors_raise_in_call_mode() {
    let host = StubHost::new();
    host.push(Ok(Reply::Array(vec![error(b"ERR deep")])));
    let mut engine = engine_with(host.clone());
    assert_eq!(engine.eval(b"return redis.call('X')"), error(b"ERR deep"));

    host.push(Ok(Reply::Array(vec![error(b"ERR deep")])));
    assert_eq!(
        engine.eval(b"return redis.pcall('X')[1].err"),
        bulk(b"ERR deep")
    );
}

#[test]
fn call_without_arguments_fails() {
    let mut engine = engine_with(StubHost::new());
    assert_eq!(
        engine.eval(b"return redis.call()"),
        error(b"ERR redis.call requires arguments")
    );
}

#[test]
fn invalid_argument_types_fail() {
    let host = StubHost::new();
    let mut engine = engine_with(host.clone());
    assert_eq!(
        engine.eval(b"return redis.call('SET', {})"),
        error(b"ERR invalid argument to redis.call")
    );
    assert!(host.calls().is_empty());
}

#[test]
fn log_reaches_the_host() {
    let host = StubHost::new();
    let mut engine = engine_with(host.clone());

    engine.eval(b"redis.log(redis.LOG_WARNING, 'look out')");
    engine.eval(b"redis.log(redis.LOG_DEBUG, 'quiet')");
    assert_eq!(
        host.logs(),
        vec![
            (LogLevel::Warning, b"look out".to_vec()),
            (LogLevel::Debug, b"quiet".to_vec()),
        ]
    );
}

#[test]
fn log_constants_are_exported() {
    let mut engine = engine_with(StubHost::new());
    assert_eq!(
        engine.eval(
            b"return {redis.LOG_DEBUG, redis.LOG_VERBOSE, redis.LOG_NOTICE, redis.LOG_WARNING}"
        ),
        Reply::Array(vec![
            Reply::Int(0),
            Reply::Int(1),
            Reply::Int(2),
            Reply::Int(3),
        ])
    );
}

#[test]
fn log_requires_level_and_message() {
    let mut engine = engine_with(StubHost::new());
    assert_eq!(
        engine.eval(b"redis.log(redis.LOG_WARNING)"),
        error(b"ERR redis.log requires level and message")
    );
}

#[test]
fn print_forwards_to_the_log() {
    let host = StubHost::new();
    let mut engine = engine_with(host.clone());
    engine.eval(b"print('a', 1, true)");
    assert_eq!(host.logs(), vec![(LogLevel::Notice, b"a\t1\ttrue".to_vec())]);
}

#[test]
fn sha1hex_is_redis_exact() {
    assert_eq!(
        engine_with(StubHost::new()).eval(b"return redis.sha1hex('hello')"),
        bulk(b"aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
    );
    assert_eq!(
        engine_with(StubHost::new()).eval(b"return redis.sha1hex('')"),
        bulk(b"da39a3ee5e6b4b0d3255bfef95601890afd80709")
    );
}

#[test]
fn status_and_error_reply_constructors() {
    let mut engine = engine_with(StubHost::new());
    assert_eq!(
        engine.eval(b"return redis.status_reply('Good')"),
        status(b"Good")
    );
    assert_eq!(
        engine.eval(b"return redis.error_reply('oops')"),
        error(b"oops")
    );
    assert_eq!(
        engine.eval(b"return redis.status_reply('Good').ok"),
        bulk(b"Good")
    );
}

#[test]
fn setresp_records_and_returns_previous() {
    let mut engine = engine_with(StubHost::new());
    assert_eq!(engine.eval(b"return redis.setresp(3)"), Reply::Int(2));
    assert_eq!(engine.eval(b"return redis.setresp(2)"), Reply::Int(3));
    assert_eq!(engine.resp_version(), 2);
}

#[test]
fn runtime_decorates_script_errors() {
    let mut runtime = Runtime::standalone().unwrap();
    let script = b"local x = 1\nredis.nonexistent()";
    let sha = runtime.load(script).unwrap();

    let Reply::Error(payload) = runtime.eval(script, &[], &[]) else {
        panic!("expected an error reply");
    };
    let text = std::str::from_utf8(&payload).unwrap();
    assert!(text.starts_with("user_script:2: "), "{text}");
    assert!(text.ends_with(&format!(" script: {sha}, on @user_script:2.")), "{text}");
}

#[test]
fn runtime_passes_foreign_errors_through() {
    let host = StubHost::new();
    host.push(Err(ReplyError::Custom(Bytes::from_static(b"ERR boom"))));
    let mut runtime = Runtime::new(host, Default::default()).unwrap();
    assert_eq!(runtime.eval(b"redis.call('X')", &[], &[]), error(b"ERR boom"));
}

#[test]
fn script_cache_serves_eval_sha() {
    let mut runtime = Runtime::standalone().unwrap();
    let sha = runtime.load(b"return 40 + 2").unwrap();
    assert_eq!(sha.len(), 40);

    assert_eq!(runtime.eval_sha(&sha, &[], &[]), Reply::Int(42));
    assert_eq!(
        runtime.eval_sha(&sha.to_uppercase(), &[], &[]),
        Reply::Int(42)
    );
    assert_eq!(runtime.exists(&[&sha, "0000"]), vec![true, false]);

    runtime.flush();
    assert_eq!(
        runtime.eval_sha(&sha, &[], &[]),
        Reply::Error(Bytes::from_static(
            b"NOSCRIPT No matching script. Please use EVAL."
        ))
    );
}

#[test]
fn eval_populates_the_cache() {
    let mut runtime = Runtime::standalone().unwrap();
    let mut other = Runtime::standalone().unwrap();
    let sha = other.load(b"return 7").unwrap();

    assert_eq!(runtime.exists(&[&sha]), vec![false]);
    assert_eq!(runtime.eval(b"return 7", &[], &[]), Reply::Int(7));
    assert_eq!(runtime.exists(&[&sha]), vec![true]);
}

#[test]
fn load_rejects_broken_scripts() {
    let mut runtime = Runtime::standalone().unwrap();
    assert!(runtime.load(b"return 1 +").is_err());
    assert!(runtime.load(b"return 1").is_ok());
}

#[test]
fn runtime_keys_and_argv() {
    let mut runtime = Runtime::standalone().unwrap();
    let keys = vec![Bytes::from_static(b"k1")];
    let argv = vec![Bytes::from_static(&[0x00, 0xff])];
    assert_eq!(
        runtime.eval(b"return {KEYS[1], ARGV[1]}", &keys, &argv),
        Reply::Array(vec![bulk(b"k1"), bulk(&[0x00, 0xff])])
    );
}

#[test]
fn null_host_refusal_is_catchable() {
    let mut runtime = Runtime::standalone().unwrap();
    assert_eq!(
        runtime.eval(b"return redis.pcall('GET', 'k').err", &[], &[]),
        bulk(b"ERR no host configured")
    );
}

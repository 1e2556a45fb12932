//! Line console over the engine.
//!
//! A line is `[loop=N] [par] token...`. Tokens are action names. Without
//! `par` they run one after another; with `par` they run concurrently.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use vmc_engine::{DoerRef, Engine, EngineError, Graph, RepeatN, Result};

/// A parsed console line.
pub enum Command {
    Help,
    Run(DoerRef),
    Empty,
}

/// Parse one console line into a runnable command.
pub fn parse_line(engine: &Engine, line: &str) -> Result<Command> {
    let mut repeat: Option<u32> = None;
    let mut parallel = false;
    let mut tokens = Vec::new();
    for word in line.split_whitespace() {
        if word == "help" {
            return Ok(Command::Help);
        }
        if word == "par" {
            parallel = true;
            continue;
        }
        if let Some(n) = word.strip_prefix("loop=") {
            if repeat.is_some() {
                return Err(EngineError::msg("multiple loop= not supported"));
            }
            let n: u32 = n.parse().map_err(|e: std::num::ParseIntError| {
                EngineError::ParseInt {
                    input: n.to_string(),
                    reason: e.to_string(),
                }
            })?;
            repeat = Some(n);
            continue;
        }
        tokens.push(word);
    }
    if tokens.is_empty() {
        return Ok(Command::Empty);
    }

    let mut graph = Graph::new("console");
    let mut last = graph.root();
    for token in tokens {
        let d = engine.resolve_or_lazy(token)?;
        if parallel {
            graph.add(d, &[]);
        } else {
            last = graph.append(last, d);
        }
    }
    let d: DoerRef = Arc::new(graph);
    Ok(match repeat {
        Some(n) => Command::Run(Arc::new(RepeatN::new(n, d))),
        None => Command::Run(d),
    })
}

pub fn usage(engine: &Engine) -> String {
    let mut out = String::from(
        "syntax: [loop=N] [par] action...\n\
         \x20 loop=N  repeat the line N times\n\
         \x20 par     run actions concurrently\n\
         \x20 help    this text\n\
         actions:\n",
    );
    for name in engine.list() {
        out.push_str("  ");
        out.push_str(&name);
        out.push('\n');
    }
    out
}

/// Parse, validate and run a line. Errors are logged, not returned.
pub async fn run_line(engine: &Engine, line: &str) {
    match parse_line(engine, line) {
        Ok(Command::Help) => println!("{}", usage(engine)),
        Ok(Command::Empty) => {}
        Ok(Command::Run(d)) => {
            if let Err(e) = engine.validate_exec(&engine.context(), d.as_ref()).await {
                tracing::error!(line = %line, error = %e, "console");
            }
        }
        Err(e) => tracing::error!(line = %line, error = %e, "console parse"),
    }
}

/// Read lines from stdin until EOF or ctrl-c.
pub async fn interactive(engine: &Engine) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => run_line(engine, &line).await,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vmc_engine::{Doer, FuncArg};

    fn engine_with_counter() -> (Engine, Arc<AtomicU32>) {
        let e = Engine::new();
        let total = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&total);
        e.register(
            "add(?)",
            Arc::new(FuncArg::sync("add", move |_, arg| {
                t.fetch_add(arg, Ordering::SeqCst);
                Ok(())
            })),
        );
        (e, total)
    }

    fn runnable(e: &Engine, line: &str) -> DoerRef {
        match parse_line(e, line).unwrap() {
            Command::Run(d) => d,
            _ => panic!("expected a runnable line: {}", line),
        }
    }

    #[test]
    fn test_parse_special_lines() {
        let (e, _) = engine_with_counter();
        assert!(matches!(parse_line(&e, "").unwrap(), Command::Empty));
        assert!(matches!(parse_line(&e, "  par ").unwrap(), Command::Empty));
        assert!(matches!(parse_line(&e, "add(1) help").unwrap(), Command::Help));
        assert!(parse_line(&e, "loop=2 loop=3 add(1)").is_err());
        assert!(parse_line(&e, "loop=x add(1)").is_err());
    }

    #[tokio::test]
    async fn test_chain_and_loop() {
        let (e, total) = engine_with_counter();
        let d = runnable(&e, "loop=3 add(1) add(2)");
        assert!(d.describe().starts_with("RepeatN(N=3"));
        e.validate_exec(&e.context(), d.as_ref()).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_par() {
        let (e, total) = engine_with_counter();
        let d = runnable(&e, "par add(1) add(10) sleep(5ms)");
        e.validate_exec(&e.context(), d.as_ref()).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_unknown_action_fails_validate() {
        let (e, _) = engine_with_counter();
        let d = runnable(&e, "add(1) nope");
        assert!(d.validate().unwrap_err().is_not_resolved());
    }

    #[test]
    fn test_usage_lists_actions() {
        let (e, _) = engine_with_counter();
        let text = usage(&e);
        assert!(text.contains("  add(?)\n"));
        assert!(text.contains("  ignore(?)\n"));
    }
}

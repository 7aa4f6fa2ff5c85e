use std::error::Error;
use std::net::SocketAddr;
use std::process::exit;
use std::time::{Duration, TryFromFloatSecsError};

use clap::{Parser, Subcommand};
use log::{error, info};
use osc_dispatch::{Arg, Message, Server, TimeTag, Transport, UdpTransport, patterns_intersect};

#[derive(Parser)]
#[clap(name = "oscd", version, about = "Send, receive and inspect OSC packets")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every received message that matches a pattern
    Listen {
        #[clap(short, long, default_value = "127.0.0.1:57120")]
        bind: String,
        /// OSC address pattern; every message when omitted
        #[clap(short, long)]
        pattern: Option<String>,
        /// Only show messages whose arguments fit these type tags (i, f, s, b)
        #[clap(short, long)]
        typespec: Option<String>,
    },
    /// Send one message
    Send {
        #[clap(short, long)]
        to: SocketAddr,
        /// Wrap the message in a bundle due this many seconds from now
        #[clap(short, long)]
        delay: Option<f64>,
        address: String,
        /// Parsed as int, then float, otherwise sent as a string
        args: Vec<String>,
    },
    /// Report whether two address patterns can match a common address
    Intersect { a: String, b: String },
}

fn parse_arg(raw: &str) -> Arg {
    if let Ok(i) = raw.parse::<i32>() {
        Arg::Int(i)
    } else if let Ok(f) = raw.parse::<f32>() {
        Arg::Float(f)
    } else {
        Arg::String(raw.to_string())
    }
}

/// A positive `--delay` as a duration. Zero, negative and NaN mean "send now".
fn parse_delay(delay: Option<f64>) -> Result<Option<Duration>, TryFromFloatSecsError> {
    match delay {
        Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).map(Some),
        _ => Ok(None),
    }
}

fn listen(bind: &str, pattern: Option<&str>, typespec: Option<&str>) -> Result<(), Box<dyn Error>> {
    let server = Server::new(UdpTransport::bind(bind)?);
    server.dispatcher().add_method(pattern, typespec, |msg| {
        match msg.source() {
            Some(source) => println!("[{source}] {msg}"),
            None => println!("{msg}"),
        }
        Ok(())
    })?;
    info!("listening on {}", server.transport().local_addr()?);
    server.serve()?;
    Ok(())
}

fn send(to: SocketAddr, delay: Option<f64>, address: &str, args: &[String]) -> Result<(), Box<dyn Error>> {
    let transport = UdpTransport::bind("0.0.0.0:0")?;
    let mut msg = Message::new(address);
    for raw in args {
        msg.push(parse_arg(raw));
    }

    match parse_delay(delay)? {
        Some(delay) => {
            let timetag = TimeTag::now().after(delay);
            info!("sending {msg} to {to} at {timetag}");
            transport.send_timestamped(msg, timetag, to)?;
        }
        None => {
            info!("sending {msg} to {to}");
            transport.send_packet(&msg.into(), to)?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match Cli::parse().command {
        Command::Listen {
            bind,
            pattern,
            typespec,
        } => listen(&bind, pattern.as_deref(), typespec.as_deref()),
        Command::Send {
            to,
            delay,
            address,
            args,
        } => send(to, delay, &address, &args),
        Command::Intersect { a, b } => {
            println!("{}", patterns_intersect(&a, &b));
            Ok(())
        }
    };

    match result {
        Ok(_) => (),
        Err(err) => {
            error!("{err}");
            exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_prefers_int_then_float() {
        assert_eq!(parse_arg("42"), Arg::Int(42));
        assert_eq!(parse_arg("-1.5"), Arg::Float(-1.5));
        assert_eq!(parse_arg("hello"), Arg::String("hello".to_string()));
        assert_eq!(parse_arg("1e3"), Arg::Float(1000.0));
    }

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay(None).unwrap(), None);
        assert_eq!(parse_delay(Some(0.0)).unwrap(), None);
        assert_eq!(parse_delay(Some(f64::NAN)).unwrap(), None);
        assert_eq!(parse_delay(Some(0.5)).unwrap(), Some(Duration::from_millis(500)));
        assert!(parse_delay(Some(f64::INFINITY)).is_err());
        assert!(parse_delay(Some(1e300)).is_err());
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::parse_from(["oscd", "send", "--to", "127.0.0.1:9000", "-d", "0.5", "/a", "1", "x"]);
        match cli.command {
            Command::Send { to, delay, address, args } => {
                assert_eq!(to.port(), 9000);
                assert_eq!(delay, Some(0.5));
                assert_eq!(address, "/a");
                assert_eq!(args, vec!["1", "x"]);
            }
            _ => panic!("expected send"),
        }
    }
}

//! Warble CLI Client
//!
//! Interactive command-line client for a warble edge node.

use clap::Parser;
use std::io::{self, Write};
use warble::protocol::{Reply, ReplyBody, Request};
use warble::{TcpTransport, Transport};

/// Warble CLI - Interactive Client
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Node host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Node port
    #[arg(short, long, default_value_t = 7001)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let location = format!("{}:{}", args.host, args.port);
    let transport = TcpTransport::new();

    println!("Talking to warble at {}", location);
    println!("Type 'help' for available commands, 'quit' to exit.\n");

    loop {
        print!("warble> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }

        match parse_command(input) {
            Ok(request) => match transport.call(&location, request).await {
                Ok(reply) => print_reply(&reply),
                Err(e) => eprintln!("Error: {}", e),
            },
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn parse_command(input: &str) -> anyhow::Result<Request> {
    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_uppercase(), rest.trim()),
        None => (input.to_uppercase(), ""),
    };

    match cmd.as_str() {
        "PING" => Ok(Request::Probe),

        "POST" => {
            if rest.is_empty() {
                anyhow::bail!("POST requires content: POST <text with #tags>");
            }
            Ok(Request::Publish {
                content: rest.to_string(),
                tags: Vec::new(),
            })
        }

        "SEARCH" => {
            let tag = rest.trim_start_matches('#');
            if tag.is_empty() || tag.contains(char::is_whitespace) {
                anyhow::bail!("SEARCH requires one tag: SEARCH <tag>");
            }
            Ok(Request::Search {
                tag: tag.to_string(),
                version: None,
                clock: Default::default(),
            })
        }

        "SNAPSHOT" => Ok(Request::Snapshot { upper_bound: None }),

        "DIRECTORY" => Ok(Request::FetchDirectory),

        _ => anyhow::bail!("Unknown command: {}. Type 'help' for available commands.", cmd),
    }
}

fn print_reply(reply: &Reply) {
    match &reply.body {
        Some(ReplyBody::Feed { tag, posts }) => {
            println!("{} #{} ({} posts)", reply.status, tag, posts.len());
            for (i, post) in posts.iter().enumerate() {
                println!("  {}) {}", i + 1, post);
            }
        }
        Some(ReplyBody::Clock { clock }) => println!("{} {}", reply.status, clock),
        Some(ReplyBody::Directory { servers }) => {
            println!("{}", reply.status);
            for (node_id, location) in servers {
                println!("  {:<12} {}", node_id, location.as_deref().unwrap_or("down"));
            }
        }
        Some(ReplyBody::Aggregate { snapshots }) => {
            println!("{}", reply.status);
            for (node_id, node) in snapshots {
                println!(
                    "  {:<12} {} entries, clock {}",
                    node_id,
                    node.snapshot.entry_count(),
                    node.clock
                );
                for (key, values) in &node.snapshot.entries {
                    let values: Vec<&str> = values.keys().map(String::as_str).collect();
                    println!("    #{}: {}", key, values.join(" | "));
                }
            }
        }
        Some(ReplyBody::Message { message }) => println!("{} {}", reply.status, message),
        Some(other) => println!("{} {:?}", reply.status, other),
        None => println!("{}", reply.status),
    }
}

fn print_help() {
    println!(
        r#"
Available commands:

  PING                - Check node connectivity
  POST <text>         - Publish a post; hashtags are taken from the text
  SEARCH <tag>        - Posts carrying a tag, causally ordered
  SNAPSHOT            - Consistent snapshot of every storage node
  DIRECTORY           - Membership directory (discovery node only)

  help                - Show this help
  quit / exit         - Exit the CLI

Examples:
  POST shipping the new release #rust #release
  SEARCH rust
"#
    );
}

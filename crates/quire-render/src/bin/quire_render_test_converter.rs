//! Fake HTML-to-PDF converter used by integration tests.
//!
//! Accepts the same flags `RenderOptions` emits plus a few behaviour switches,
//! then writes `%PDF-1.4\n` followed by the input bytes to the output path.

use std::{
    env, fs,
    io::{self, Write},
    process, thread,
    time::Duration,
};

const PDF_HEADER: &[u8] = b"%PDF-1.4\n";

fn parse_u64(value: Option<String>, flag: &str) -> u64 {
    let value = value.unwrap_or_else(|| {
        eprintln!("missing value for {flag}");
        process::exit(2);
    });
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid u64 for {flag}: {value}");
        process::exit(2);
    })
}

fn write_repeated(mut writer: impl Write, mut bytes: usize, fill: u8) -> io::Result<()> {
    let buf = [fill; 8 * 1024];
    while bytes > 0 {
        let n = bytes.min(buf.len());
        writer.write_all(&buf[..n])?;
        bytes -= n;
    }
    writer.flush()
}

fn spawn_child_sleep(ms: u64) {
    let exe = env::current_exe().unwrap_or_else(|err| {
        eprintln!("failed to resolve current exe: {err}");
        process::exit(2);
    });

    let _child = process::Command::new(exe)
        .args(["--sleep-ms", &ms.to_string()])
        .spawn()
        .unwrap_or_else(|err| {
            eprintln!("failed to spawn child: {err}");
            process::exit(2);
        });
}

fn main() {
    let mut fail = false;
    let mut empty = false;
    let mut no_output = false;
    let mut count_file = None;
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fail" => fail = true,
            "--empty" => empty = true,
            "--no-output" => no_output = true,
            "--count-file" => count_file = args.next(),
            "--sleep-ms" => {
                let ms = parse_u64(args.next(), "--sleep-ms");
                thread::sleep(Duration::from_millis(ms));
            }
            "--spawn-child-sleep-ms" => {
                let ms = parse_u64(args.next(), "--spawn-child-sleep-ms");
                spawn_child_sleep(ms);
            }
            "--stderr-bytes" => {
                let bytes = parse_u64(args.next(), "--stderr-bytes") as usize;
                write_repeated(io::stderr().lock(), bytes, b'e').unwrap();
            }
            "--page-size" | "--margin-top" | "--margin-bottom" | "--margin-left"
            | "--margin-right" | "--dpi" => {
                if args.next().is_none() {
                    eprintln!("missing value for {arg}");
                    process::exit(2);
                }
            }
            "--print-media-type" | "--no-print-media-type" => {}
            other if other.starts_with("--") => {
                eprintln!("unknown argument: {other}");
                process::exit(2);
            }
            _ => positional.push(arg),
        }
    }

    if let Some(path) = count_file {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "run").unwrap();
    }

    let [input, output] = positional.as_slice() else {
        eprintln!("usage: quire_render_test_converter [flags] <input.html> <output.pdf>");
        process::exit(2);
    };

    if fail {
        eprintln!("conversion failed: unsupported markup");
        process::exit(1);
    }
    if no_output {
        let _ = fs::remove_file(output);
        return;
    }

    let mut bytes = Vec::new();
    if !empty {
        let html = fs::read(input).unwrap_or_else(|err| {
            eprintln!("cannot read {input}: {err}");
            process::exit(3);
        });
        bytes.extend_from_slice(PDF_HEADER);
        bytes.extend_from_slice(&html);
    }
    fs::write(output, bytes).unwrap_or_else(|err| {
        eprintln!("cannot write {output}: {err}");
        process::exit(3);
    });
}

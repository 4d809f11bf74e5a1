//! Stand-in HTML-to-PDF converter for `quire` CLI tests.
//!
//! `--fail` exits non-zero with a diagnostic; otherwise the output file gets a
//! PDF header followed by the input HTML. Page-layout flags are accepted and
//! ignored.

use std::{env, fs, process};

fn main() {
    let mut fail = false;
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fail" => fail = true,
            "--page-size" | "--margin-top" | "--margin-bottom" | "--margin-left"
            | "--margin-right" | "--dpi" => {
                let _ = args.next();
            }
            "--print-media-type" | "--no-print-media-type" => {}
            _ => positional.push(arg),
        }
    }

    let [input, output] = positional.as_slice() else {
        eprintln!("usage: quire-cli-test-converter [--fail] <input.html> <output.pdf>");
        process::exit(2);
    };

    if fail {
        eprintln!("conversion failed: unsupported markup");
        process::exit(1);
    }

    let html = fs::read(input).unwrap_or_else(|err| {
        eprintln!("cannot read {input}: {err}");
        process::exit(3);
    });
    let mut pdf = b"%PDF-1.4\n".to_vec();
    pdf.extend_from_slice(&html);
    fs::write(output, pdf).unwrap_or_else(|err| {
        eprintln!("cannot write {output}: {err}");
        process::exit(3);
    });
}

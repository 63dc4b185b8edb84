//! A tiny fuzz target for exercising the bridge end to end.
//!
//! Reads one byte from stdin: `'7'` fails the iteration, any other even
//! byte takes one traced branch, any other odd byte the other. What a
//! fuzzer sees here is exactly what a managed runtime embedding the
//! bridge looks like: setup first, a late `init`, one traced iteration
//! per forked child, a clean `exit(0)`.

use std::io::{self, Read};

fn even_branch() {
    aflguest::trace_call(file!(), line!());
}

fn odd_branch() {
    aflguest::trace_call(file!(), line!());
}

fn run_one(input: u8) -> Result<(), String> {
    aflguest::trace_call(file!(), line!());
    if input == b'7' {
        return Err(format!("refusing input byte {input:#04x}"));
    }
    if input % 2 == 0 {
        even_branch();
    } else {
        odd_branch();
    }
    Ok(())
}

fn main() {
    aflguest::init().expect("bridge init failed");

    // Only the forked child gets here; stdin carries this iteration's
    // testcase, rewound by the fuzzer.
    let mut byte = [0_u8; 1];
    let input = match io::stdin().read(&mut byte) {
        Ok(1) => byte[0],
        _ => 0,
    };

    aflguest::with_failures_as_crashes(|| run_one(input));

    // A clean iteration must leave by a plain zero exit so the status
    // word can never look like a crash.
    std::process::exit(0);
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use taxis::categories::CategorySet;
use taxis::classifier::{parse_response, FieldPolicy};
use taxis::descriptor::FileDescriptor;
use taxis::ollama::NdjsonDecoder;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    file_name: &'a str,
    reply: &'a str,
    first_wins: bool,
    chunks: Vec<&'a [u8]>,
}

fuzz_target!(|input: Input| {
    let categories = CategorySet::builtin();
    let descriptor = FileDescriptor::detached(format!("/fuzz/{}", input.file_name));
    let policy = if input.first_wins { FieldPolicy::FirstWins } else { FieldPolicy::LastWins };

    let outcome = parse_response(input.reply, &descriptor, &categories, policy);
    assert!((0.0..=1.0).contains(&outcome.confidence));
    assert!(categories.find_by_id(&outcome.category.id).is_some());

    let mut decoder = NdjsonDecoder::default();
    for chunk in &input.chunks {
        decoder.push(chunk);
    }
    decoder.finish();
});

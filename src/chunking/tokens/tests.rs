use super::*;

#[test]
fn counts_words_and_punctuation() {
    let counter = TokenCounter::default();
    assert_eq!(counter.count("hello world"), 2);
    assert_eq!(counter.count("This is a test."), 5);
    assert_eq!(counter.count(""), 0);
}

#[test]
fn spans_cover_the_whole_text() {
    let tokenizer = RegexTokenizer::default();
    let text = "Título: año 2024,\n\n  internationalization — ok!";
    let spans = tokenizer.token_spans(text);

    let mut expected_start = 0;
    for span in &spans {
        assert_eq!(span.start, expected_start, "spans must be contiguous");
        assert!(span.end > span.start);
        expected_start = span.end;
    }
    assert_eq!(expected_start, text.len());

    let rebuilt: String = spans
        .iter()
        .map(|span| text.get(span.clone()).expect("span on char boundary"))
        .collect();
    assert_eq!(rebuilt, text);
}

#[test]
fn long_pieces_are_cut() {
    let tokenizer = RegexTokenizer::new(4);
    // " abcdefghij" is 11 chars: 4 + 4 + 3
    assert_eq!(tokenizer.count(" abcdefghij"), 3);
    assert_eq!(RegexTokenizer::new(100).count(" abcdefghij"), 1);
}

#[test]
fn unbroken_blob_scales_with_length() {
    let counter = TokenCounter::default();
    let blob = "x".repeat(800);
    assert_eq!(counter.count(&blob), 100);
}

#[test]
fn tail_returns_last_tokens() {
    let counter = TokenCounter::default();
    assert_eq!(counter.tail("one two three", 2), "two three");
    assert_eq!(counter.tail("one two three", 10), "one two three");
    assert_eq!(counter.tail("one two three", 0), "");
    assert_eq!(counter.tail("", 5), "");
}

#[test]
fn tail_respects_multibyte_boundaries() {
    let counter = TokenCounter::default();
    let tail = counter.tail("canción número único", 2);
    assert_eq!(tail, "número único");
}

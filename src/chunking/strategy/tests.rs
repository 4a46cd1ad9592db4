use super::*;

fn budget(counter: &TokenCounter, max_tokens: usize) -> Budget<'_> {
    Budget {
        max_tokens,
        avg_chars_per_token: 4.0,
        counter,
    }
}

fn unit_texts<'a>(text: &'a str, units: &[Unit]) -> Vec<&'a str> {
    units
        .iter()
        .map(|unit| text.get(unit.span.clone()).expect("unit on char boundary"))
        .collect()
}

#[test]
fn chain_order_follows_flags() {
    let chain = SplitChain::new(true, true, 10, 20);
    assert_eq!(
        chain.levels(),
        vec![SplitLevel::Paragraph, SplitLevel::Sentence, SplitLevel::Hard]
    );

    let chain = SplitChain::new(false, false, 10, 20);
    assert_eq!(chain.levels(), vec![SplitLevel::Hard]);
}

#[test]
fn small_span_stays_whole() {
    let counter = TokenCounter::default();
    let text = "A short paragraph.\n\nAnother one.";
    let chain = SplitChain::new(true, true, 100, 200);
    let units = chain.units(text, 0..text.len(), &budget(&counter, 200));

    assert_eq!(units.len(), 1);
    assert_eq!(units[0].origin, None);
    assert_eq!(units[0].span, 0..text.len());
}

#[test]
fn large_section_splits_into_paragraphs() {
    let counter = TokenCounter::default();
    let paragraph = "word ".repeat(30);
    let text = format!("{p}\n\n{p}\n\n{p}", p = paragraph.trim());
    let chain = SplitChain::new(true, true, 50, 80);
    let units = chain.units(&text, 0..text.len(), &budget(&counter, 80));

    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.origin == Some(SplitLevel::Paragraph)));
    assert!(units.iter().all(|u| u.tokens == 30));
}

#[test]
fn oversized_paragraph_falls_back_to_sentences() {
    let counter = TokenCounter::default();
    let sentence = format!("Word {}end.", "word ".repeat(19));
    let text = [sentence.as_str(); 4].join(" ");
    let chain = SplitChain::new(true, true, 30, 40);
    let units = chain.units(&text, 0..text.len(), &budget(&counter, 40));

    assert_eq!(units.len(), 4);
    assert!(units.iter().all(|u| u.origin == Some(SplitLevel::Sentence)));
    assert!(unit_texts(&text, &units).iter().all(|t| t.ends_with("end.")));
}

#[test]
fn unbroken_text_is_hard_split() {
    let counter = TokenCounter::default();
    let text = "x".repeat(1000);
    let chain = SplitChain::new(true, true, 20, 25);
    let units = chain.units(&text, 0..text.len(), &budget(&counter, 25));

    assert!(units.len() > 1);
    assert!(units.iter().all(Unit::is_hard_split));
    assert!(units.iter().all(|u| u.tokens <= 25));
    let rebuilt: String = unit_texts(&text, &units).concat();
    assert_eq!(rebuilt, text);
}

#[test]
fn hard_split_halves_dense_pieces() {
    let counter = TokenCounter::default();
    // punctuation-dense text tokenizes at far fewer than 4 chars per token
    let text = ". ".repeat(200);
    let budget = budget(&counter, 10);
    let pieces = HardSplit.split(&text, &budget).expect("hard split always yields pieces");

    for piece in pieces {
        let slice = text.get(piece).expect("piece on char boundary");
        assert!(counter.count(slice) <= 10);
    }
}

#[test]
fn paragraph_split_needs_more_than_one_piece() {
    let counter = TokenCounter::default();
    assert!(
        ParagraphSplit
            .split("single paragraph", &budget(&counter, 1))
            .is_none()
    );
    assert!(
        SentenceSplit
            .split("no sentence end here", &budget(&counter, 1))
            .is_none()
    );
}

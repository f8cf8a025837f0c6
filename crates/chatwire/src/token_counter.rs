//! Cheap token estimation for sizing context windows without loading a tokenizer.

const ALPHA_TOKENS_PER_BYTE: f64 = 0.192;
const DIGIT_TOKENS_PER_BYTE: f64 = 0.423;
const SYMBOL_TOKENS_PER_BYTE: f64 = 0.5;
const UNICODE_TOKENS_PER_BYTE: f64 = 0.481;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ByteClasses {
    alpha: usize,
    digits: usize,
    symbols: usize,
    unicode: usize,
}

impl ByteClasses {
    fn of(text: &str) -> Self {
        text.bytes().fold(Self::default(), |mut classes, b| {
            if b.is_ascii_alphabetic() {
                classes.alpha += 1;
            } else if b.is_ascii_digit() {
                classes.digits += 1;
            } else if b <= 0x80 {
                classes.symbols += 1;
            } else {
                classes.unicode += 1;
            }
            classes
        })
    }
}

fn scaled(count: usize, factor: f64) -> usize {
    (count as f64 * factor).ceil() as usize
}

/// Estimates how many tokens a typical BPE tokenizer produces for `text`.
pub fn estimate_tokens(text: &str) -> usize {
    let classes = ByteClasses::of(text);
    scaled(classes.alpha, ALPHA_TOKENS_PER_BYTE)
        + scaled(classes.digits, DIGIT_TOKENS_PER_BYTE)
        + scaled(classes.symbols, SYMBOL_TOKENS_PER_BYTE)
        + scaled(classes.unicode, UNICODE_TOKENS_PER_BYTE)
}

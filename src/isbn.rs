//! ISBN validity checking.
//!
//! A book with an unusable ISBN can never be matched remotely, so the
//! reconciler rejects it before spending a network slot. "Usable" means:
//! 10 or 13 significant characters after stripping separators, a correct
//! check digit, and a non-degenerate payload (all-zero cores are catalogue
//! placeholders, not assignable numbers).

/// Returns whether `isbn` is a checksum-valid, non-placeholder ISBN-10 or
/// ISBN-13. Hyphens and spaces are ignored; the string may not contain any
/// other non-digit except a final `X` check character in the 10-digit form.
#[must_use]
pub fn is_valid(isbn: &str) -> bool {
    let compact: Vec<char> = isbn
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect();

    match compact.len() {
        10 => is_valid_isbn10(&compact),
        13 => is_valid_isbn13(&compact),
        _ => false,
    }
}

fn is_valid_isbn10(digits: &[char]) -> bool {
    let mut sum: u32 = 0;
    for (i, &c) in digits.iter().enumerate() {
        let value = match c {
            '0'..='9' => u32::from(c) - u32::from('0'),
            // 'X' stands for 10, check position only.
            'X' | 'x' if i == 9 => 10,
            _ => return false,
        };
        sum += value * (10 - i as u32);
    }
    sum % 11 == 0 && !is_placeholder(&digits[..9])
}

fn is_valid_isbn13(digits: &[char]) -> bool {
    if !digits.iter().all(char::is_ascii_digit) {
        return false;
    }
    let mut sum: u32 = 0;
    for (i, &c) in digits.iter().enumerate() {
        let value = u32::from(c) - u32::from('0');
        sum += value * if i % 2 == 0 { 1 } else { 3 };
    }
    // Bookland prefix plus a live payload; 9780000000002 balances the mod-10
    // sum but its zero core is a placeholder, not a book.
    sum % 10 == 0
        && (digits.starts_with(&['9', '7', '8']) || digits.starts_with(&['9', '7', '9']))
        && !is_placeholder(&digits[3..12])
}

fn is_placeholder(core: &[char]) -> bool {
    core.iter().all(|&c| c == '0')
}

/// Marker appended to the last kept line when a headline is cut short.
pub const TRUNCATION_MARKER: char = '…';

/// Split `text` into at most `max_lines` display lines of at most `max_len`
/// characters, breaking only between words.
///
/// Whitespace runs collapse to single spaces. A single word longer than
/// `max_len` gets a line of its own and is never broken. When the text needs
/// more than `max_lines` lines, the last kept line ends with
/// [`TRUNCATION_MARKER`], dropping trailing words from it to make room.
pub fn wrap_headline(text: &str, max_len: usize, max_lines: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let max_lines = max_lines.max(1);

    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut line_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if line_len > 0 && line_len + 1 + word_len > max_len {
            lines.push(std::mem::take(&mut line));
            line_len = 0;
        }
        if line_len > 0 {
            line.push(' ');
            line_len += 1;
        }
        line.push_str(word);
        line_len += word_len;
    }
    if line_len > 0 {
        lines.push(line);
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            *last = with_marker(last, max_len);
        }
    }
    lines
}

fn with_marker(line: &str, max_len: usize) -> String {
    let mut words: Vec<&str> = line.split(' ').collect();
    while words.len() > 1 && words.join(" ").chars().count() + 1 > max_len {
        words.pop();
    }
    let mut out = words.join(" ");
    out.push(TRUNCATION_MARKER);
    out
}

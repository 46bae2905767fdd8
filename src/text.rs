// ------------------------------------------------------------------
//  Text normalization, SSML wrapping, SRT escaping
// ------------------------------------------------------------------
//
// Grounded in the reference implementation's SsmlSrtFixer: German
// date/number rewriting, SSML escaping for five reserved characters,
// and SRT escaping for only `<`/`>`.

use crate::model::Language;

const ORDINALS: &[(u32, &str)] = &[
  (1, "erste"), (2, "zweite"), (3, "dritte"), (4, "vierte"), (5, "fünfte"),
  (6, "sechste"), (7, "siebte"), (8, "achte"), (9, "neunte"), (10, "zehnte"),
  (11, "elfte"), (12, "zwölfte"), (13, "dreizehnte"), (14, "vierzehnte"), (15, "fünfzehnte"),
  (16, "sechzehnte"), (17, "siebzehnte"), (18, "achtzehnte"), (19, "neunzehnte"), (20, "zwanzigste"),
  (21, "einundzwanzigste"), (22, "zweiundzwanzigste"), (23, "dreiundzwanzigste"), (24, "vierundzwanzigste"),
  (25, "fünfundzwanzigste"), (26, "sechsundzwanzigste"), (27, "siebenundzwanzigste"), (28, "achtundzwanzigste"),
  (29, "neunundzwanzigste"), (30, "dreißigste"), (31, "einunddreißigste"),
];

const GERMAN_MONTHS: &[&str] = &[
  "Januar", "Februar", "März", "April", "Mai", "Juni", "Juli", "August", "September", "Oktober",
  "November", "Dezember", "Jan", "Jan.", "Feb", "Feb.", "Mrz", "Mrz.", "Apr", "Apr.", "Jun", "Jun.",
  "Jul", "Jul.", "Aug", "Aug.", "Sep", "Sep.", "Okt", "Okt.", "Nov", "Nov.", "Dez", "Dez.",
];

fn ordinal_word(day: u32) -> Option<&'static str> {
  ORDINALS.iter().find(|(n, _)| *n == day).map(|(_, w)| *w)
}

/// Applies trimming, trailing-punctuation, and (for German) date/number
/// rewriting. Returns an empty string if there is no content to speak.
pub fn fix_text_segment(text: &str, language: Option<Language>) -> String {
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return String::new();
  }

  let mut out = trimmed.to_string();
  if !out.ends_with(['.', '?', '!', ';', ',', ':', '-']) {
    out.push('.');
  }

  if language == Some(Language::De) {
    out = fix_german_dates(&out);
    out = fix_german_numbers(&out);
  }

  out
}

fn fix_german_dates(text: &str) -> String {
  let words: Vec<&str> = text.split(' ').collect();
  let mut out: Vec<String> = Vec::with_capacity(words.len());
  let mut i = 0;
  while i < words.len() {
    let word = words[i];
    let bare = word.trim_end_matches('.');
    let is_day = bare.len() <= 2 && bare.chars().all(|c| c.is_ascii_digit());
    if is_day && i + 1 < words.len() {
      let next = words[i + 1];
      let next_bare = next.trim_end_matches(|c: char| !c.is_alphabetic());
      if GERMAN_MONTHS.iter().any(|m| m.eq_ignore_ascii_case(next_bare)) {
        if let Ok(day) = bare.parse::<u32>() {
          if let Some(ord) = ordinal_word(day) {
            out.push(ord.to_string());
            i += 1;
            continue;
          }
        }
      }
    }
    out.push(word.to_string());
    i += 1;
  }
  out.join(" ")
}

fn fix_german_numbers(text: &str) -> String {
  let thousands_fixed = remove_thousands_dots(text);
  rewrite_decimal_commas(&thousands_fixed)
}

fn remove_thousands_dots(text: &str) -> String {
  // Matches runs like `1.000` or `1.000.000`: a leading 1-3 digit group
  // followed by one or more `.` + exactly-3-digit groups.
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len());
  let mut i = 0;
  while i < chars.len() {
    if chars[i].is_ascii_digit() {
      let start = i;
      let mut j = i;
      while j < chars.len() && chars[j].is_ascii_digit() {
        j += 1;
      }
      let first_group_len = j - start;
      let mut k = j;
      let mut groups: Vec<(usize, usize)> = vec![(start, j)];
      while first_group_len <= 3 && k < chars.len() && chars[k] == '.' {
        let dot = k;
        let mut m = k + 1;
        while m < chars.len() && chars[m].is_ascii_digit() {
          m += 1;
        }
        if m - (dot + 1) == 3 {
          groups.push((dot + 1, m));
          k = m;
        } else {
          break;
        }
      }
      if groups.len() > 1 {
        for (a, b) in &groups {
          out.extend(&chars[*a..*b]);
        }
        i = k;
        continue;
      }
    }
    out.push(chars[i]);
    i += 1;
  }
  out
}

fn rewrite_decimal_commas(text: &str) -> String {
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len());
  let mut i = 0;
  while i < chars.len() {
    if chars[i].is_ascii_digit() {
      let start = i;
      let mut j = i;
      while j < chars.len() && chars[j].is_ascii_digit() {
        j += 1;
      }
      if j < chars.len() && chars[j] == ',' {
        let mut k = j + 1;
        while k < chars.len() && chars[k].is_ascii_digit() {
          k += 1;
        }
        if k > j + 1 {
          out.extend(&chars[start..j]);
          out.push_str(" Punkt ");
          out.extend(&chars[j + 1..k]);
          i = k;
          continue;
        }
      }
    }
    out.push(chars[i]);
    i += 1;
  }
  out
}

/// Escapes the five XML-reserved characters for use inside an SSML text node.
pub fn escape_for_ssml(text: &str) -> String {
  text
    .replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&apos;")
}

/// Escapes only `<` and `>`; `&` passes through unescaped (matches SRT
/// players that don't treat it as markup).
pub fn escape_for_srt(text: &str) -> String {
  text.replace('<', "&lt;").replace('>', "&gt;")
}

/// Wraps already-escaped text in `<speak>`/`<prosody>` tags. `rate_percent`
/// of `"100%"` omits the `<prosody>` wrapper.
pub fn ssml_wrap(escaped_text: &str, rate_percent: &str) -> String {
  if rate_percent == "100%" {
    format!("<speak>{escaped_text}</speak>")
  } else {
    format!("<speak><prosody rate=\"{rate_percent}\">{escaped_text}</prosody></speak>")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn appends_terminal_punctuation_when_missing() {
    assert_eq!(fix_text_segment("Hallo", None), "Hallo.");
    assert_eq!(fix_text_segment("Hallo!", None), "Hallo!");
  }

  #[test]
  fn empty_text_yields_empty_string() {
    assert_eq!(fix_text_segment("   ", None), "");
  }

  #[test]
  fn rewrites_german_day_ordinal() {
    let out = fix_text_segment("Wir treffen uns am 3 Juni", Some(Language::De));
    assert!(out.contains("dritte"));
  }

  #[test]
  fn removes_german_thousands_dots() {
    let out = remove_thousands_dots("Das kostet 1.000.000 Euro");
    assert!(out.contains("1000000"));
  }

  #[test]
  fn rewrites_decimal_comma_as_punkt() {
    let out = rewrite_decimal_commas("Es sind 1,5 Kilometer");
    assert_eq!(out, "Es sind 1 Punkt 5 Kilometer");
  }

  #[test]
  fn ssml_escaping_covers_five_reserved_chars() {
    assert_eq!(escape_for_ssml("A & B <x> \"y\" 'z'"), "A &amp; B &lt;x&gt; &quot;y&quot; &apos;z&apos;");
  }

  #[test]
  fn srt_escaping_only_touches_angle_brackets() {
    assert_eq!(escape_for_srt("A & B <x>"), "A & B &lt;x&gt;");
  }

  #[test]
  fn ssml_wrap_omits_prosody_at_full_rate() {
    assert_eq!(ssml_wrap("hi", "100%"), "<speak>hi</speak>");
    assert_eq!(ssml_wrap("hi", "90%"), "<speak><prosody rate=\"90%\">hi</prosody></speak>");
  }
}

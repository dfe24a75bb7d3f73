use regex::{NoExpand, Regex};
use std::sync::LazyLock;

static CONTRACTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/' [0-9]/").unwrap());

static BRACKETS: LazyLock<[(Regex, &str); 5]> = LazyLock::new(|| {
    [
        (Regex::new(r"\(\s*([^\)]*?)\s*\)").unwrap(), "(${1})"),
        (Regex::new(r"\[\s*([^\]]*?)\s*\]").unwrap(), "[${1}]"),
        (Regex::new(r"\{\s*([^}]*?)\s*\}").unwrap(), "{${1}}"),
        (Regex::new(r#""\s*([^"]*?)\s*""#).unwrap(), r#""${1}""#),
        (Regex::new(r"'\s*([^']*?)\s*'").unwrap(), "'${1}'"),
    ]
});

/// 还原 WikiText 原始文本中被空格拆开的标点与数字。
pub fn wikitext_detokenize(text: &str) -> String {
    // contractions
    let mut s = text.replace("s '", "s'");
    s = CONTRACTION.replace_all(&s, NoExpand("/'[0-9]/")).into_owned();
    // number separators
    for (from, to) in [(" @-@ ", "-"), (" @,@ ", ","), (" @.@ ", ".")] {
        s = s.replace(from, to)
    }
    // punctuation
    for p in [":", ";", ".", "!", "?", ","] {
        s = s.replace(&format!(" {p} "), &format!("{p} "))
    }
    // double brackets
    for (re, rep) in &*BRACKETS {
        s = re.replace_all(&s, *rep).into_owned()
    }
    // miscellaneous
    for (from, to) in [
        ("= = = =", "===="),
        ("= = =", "==="),
        ("= =", "=="),
        (" \u{b0} ", "\u{b0}"),
        (" \n", "\n"),
        ("\n ", "\n"),
        (" N ", " 1 "),
        (" 's", "'s"),
    ] {
        s = s.replace(from, to)
    }
    s
}

#[test]
fn test_numbers() {
    assert_eq!(
        wikitext_detokenize("1 @,@ 000 km and 3 @.@ 5 m , a well @-@ known"),
        "1,000 km and 3.5 m, a well-known"
    );
}

#[test]
fn test_brackets() {
    assert_eq!(
        wikitext_detokenize("born ( 1990 ) in [ x ] and \" quoted \""),
        "born (1990) in [x] and \"quoted\""
    );
}

#[test]
fn test_headings() {
    assert_eq!(
        wikitext_detokenize(" = = Career = = \n Text"),
        " == Career ==\nText"
    );
}

#[test]
fn test_misc() {
    assert_eq!(wikitext_detokenize("the players 's 20 \u{b0} C"), "the players's 20\u{b0}C");
    assert_eq!(wikitext_detokenize("Jones ' book"), "Jones' book");
}

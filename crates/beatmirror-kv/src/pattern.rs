/// Match `text` against a Redis-style glob supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let text: Vec<char> = text.chars().collect();

  let (mut p, mut t) = (0, 0);
  let mut star: Option<usize> = None;
  let mut resume = 0;

  while t < text.len() {
    if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
      p += 1;
      t += 1;
    } else if p < pattern.len() && pattern[p] == '*' {
      star = Some(p);
      resume = t;
      p += 1;
    } else if let Some(s) = star {
      p = s + 1;
      resume += 1;
      t = resume;
    } else {
      return false;
    }
  }

  while p < pattern.len() && pattern[p] == '*' {
    p += 1;
  }

  p == pattern.len()
}

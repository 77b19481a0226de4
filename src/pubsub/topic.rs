use std::{cmp::Ordering, fmt, hash, sync::Arc};

use globset::{GlobBuilder, GlobMatcher};
use listener_container_error::RegistryError;

/// Символы, превращающие строку в glob-шаблон.
const GLOB_META: &[char] = &['*', '?', '['];

/// Тема подписки: точное имя канала или glob-шаблон.
///
/// Неизменяема после создания. Равенство, хеш и порядок определяются парой
/// (вид, исходный текст), поэтому канал `"a"` и шаблон `"a"` это разные темы.
#[derive(Clone)]
pub enum Topic {
    /// Точное совпадение имени канала.
    Channel(Arc<str>),
    /// Glob-шаблон как в Redis `PSUBSCRIBE`: `*` совпадает с любой
    /// последовательностью символов, `?` ровно с одним символом, `[...]` с
    /// классом символов, `\` экранирует следующий символ. Остальные
    /// символы, включая `{` и `}`, литеральные.
    Pattern(PatternTopic),
}

/// Скомпилированный glob-шаблон.
#[derive(Clone)]
pub struct PatternTopic {
    source: Arc<str>,
    matcher: GlobMatcher,
}

impl Topic {
    /// Тема с точным именем канала.
    pub fn channel(name: impl AsRef<str>) -> Self {
        Topic::Channel(Arc::from(name.as_ref()))
    }

    /// Тема-шаблон. Возвращает `InvalidPattern`, если glob не компилируется.
    pub fn pattern(pattern: impl AsRef<str>) -> Result<Self, RegistryError> {
        let source = pattern.as_ref();
        if source.is_empty() {
            return Err(RegistryError::InvalidPattern {
                pattern: String::new(),
                reason: "empty pattern".to_string(),
            });
        }
        let glob = GlobBuilder::new(&to_globset_syntax(source))
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| RegistryError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.kind().to_string(),
            })?;
        Ok(Topic::Pattern(PatternTopic {
            source: Arc::from(source),
            matcher: glob.compile_matcher(),
        }))
    }

    /// Разбирает строку: при наличии `*`, `?` или `[` это шаблон, иначе канал.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        if raw.is_empty() {
            return Err(RegistryError::InvalidPattern {
                pattern: String::new(),
                reason: "empty topic".to_string(),
            });
        }
        if raw.contains(GLOB_META) {
            Topic::pattern(raw)
        } else {
            Ok(Topic::channel(raw))
        }
    }

    /// Исходный текст темы.
    pub fn as_str(&self) -> &str {
        match self {
            Topic::Channel(name) => name,
            Topic::Pattern(p) => &p.source,
        }
    }

    /// Исходный текст шаблона, для канала `None`.
    pub fn pattern_source(&self) -> Option<&Arc<str>> {
        match self {
            Topic::Channel(_) => None,
            Topic::Pattern(p) => Some(&p.source),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Topic::Pattern(_))
    }

    /// Проверяет, подходит ли канал под тему.
    pub fn matches(
        &self,
        channel: &str,
    ) -> bool {
        match self {
            Topic::Channel(name) => &**name == channel,
            Topic::Pattern(p) => p.matcher.is_match(channel),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Topic::Channel(_) => 0,
            Topic::Pattern(_) => 1,
        }
    }
}

/// Переводит шаблон в синтаксис globset.
///
/// Подряд идущие `*` схлопываются (globset принимает `**` только как целый
/// компонент пути), `{` и `}` вне класса экранируются, чтобы не включать
/// альтернативы. Экранированные символы переносятся как есть.
fn to_globset_syntax(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 2);
    let mut chars = source.chars();
    let mut prev_star = false;
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
                prev_star = false;
                continue;
            }
            '*' if !in_class && prev_star => continue,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '{' | '}' if !in_class => out.push('\\'),
            _ => {}
        }
        prev_star = c == '*' && !in_class;
        out.push(c);
    }
    out
}

impl PartialEq for Topic {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.rank() == other.rank() && self.as_str() == other.as_str()
    }
}

impl Eq for Topic {}

impl hash::Hash for Topic {
    fn hash<H: hash::Hasher>(
        &self,
        state: &mut H,
    ) {
        self.rank().hash(state);
        self.as_str().hash(state);
    }
}

impl PartialOrd for Topic {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Topic {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.as_str().cmp(other.as_str()))
    }
}

impl fmt::Display for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Topic::Channel(name) => f.debug_tuple("Channel").field(name).finish(),
            Topic::Pattern(p) => f.debug_tuple("Pattern").field(&p.source).finish(),
        }
    }
}

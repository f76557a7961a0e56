/// Expands `$NAME` references in action arguments: the registered session
/// variables (`$PACKAGE_DIR`, `$SESSION_DIR`, `$TEMPORARY_DIR`) first,
/// then plain process environment variables. Unknown names are left
/// untouched so the failure surfaces at the filesystem call that uses the
/// path.
#[derive(Debug, Clone, Default)]
pub struct VarExpander {
    bindings: Vec<(String, String)>,
    expand_environment: bool,
}

impl VarExpander {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            expand_environment: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_environment() -> Self {
        Self {
            bindings: Vec::new(),
            expand_environment: false,
        }
    }

    /// Registers (or rebinds) `$key` to expand to `value`.
    pub fn register(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(binding) = self
            .bindings
            .iter_mut()
            .find(|(existing, _)| existing == key)
        {
            binding.1 = value;
            return;
        }
        self.bindings.push((key.to_string(), value));
    }

    pub fn binding(&self, key: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn expand(&self, input: &str) -> String {
        let mut expanded = input.to_string();

        // Longer keys first so $TEMPORARY_DIR never collides with a
        // shorter binding sharing its prefix.
        let mut ordered: Vec<&(String, String)> = self.bindings.iter().collect();
        ordered.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
        for (key, value) in ordered {
            expanded = expanded.replace(&format!("${key}"), value);
        }

        if self.expand_environment {
            expanded = expand_environment_variables(&expanded);
        }
        expanded
    }
}

fn expand_environment_variables(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(position) = rest.find('$') {
        output.push_str(&rest[..position]);
        let after = &rest[position + 1..];

        let name_length = match after.chars().next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                1 + after[1..]
                    .chars()
                    .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
                    .count()
            }
            _ => 0,
        };
        let name = &after[..name_length];

        if name.is_empty() {
            output.push('$');
            rest = after;
            continue;
        }

        match std::env::var(name) {
            Ok(value) => output.push_str(&value),
            Err(_) => {
                output.push('$');
                output.push_str(name);
            }
        }
        rest = &after[name_length..];
    }

    output.push_str(rest);
    output
}

use regex::Regex;

/// Returns the last non-commented `db_dsnw` assignment in a PHP config file.
///
/// Both `$config[...]` and the legacy `$rcmail_config[...]` arrays are
/// recognised. Later assignments override earlier ones, as they would in PHP.
pub fn find_db_dsn(source: &str) -> Option<String> {
    let pattern = Regex::new(
        r#"\$(?:config|rcmail_config)\s*\[\s*['"]db_dsnw['"]\s*\]\s*=\s*(?:'([^']*)'|"([^"]*)")"#,
    )
    .ok()?;

    let mut found = None;
    for line in uncommented_lines(source) {
        if let Some(captures) = pattern.captures(line) {
            let value = captures.get(1).or_else(|| captures.get(2))?;
            found = Some(value.as_str().to_string());
        }
    }
    found
}

/// Extracts the version from `define('RCMAIL_VERSION', 'X.Y.Z');`.
pub fn find_version_marker(source: &str) -> Option<String> {
    let pattern =
        Regex::new(r#"define\(\s*['"]RCMAIL_VERSION['"]\s*,\s*['"]([^'"]+)['"]\s*\)"#).ok()?;

    uncommented_lines(source)
        .filter_map(|line| pattern.captures(line))
        .filter_map(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .next()
}

fn uncommented_lines(source: &str) -> impl Iterator<Item = &str> {
    let mut in_block = false;
    source.lines().filter(move |line| {
        let trimmed = line.trim_start();
        if in_block {
            if trimmed.contains("*/") {
                in_block = false;
            }
            return false;
        }
        if trimmed.starts_with("/*") {
            in_block = !trimmed.contains("*/");
            return false;
        }
        !(trimmed.starts_with("//") || trimmed.starts_with('#'))
    })
}

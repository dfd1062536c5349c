#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

impl ArchiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::Zip => "zip",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar.bz2" | "tbz2" => Some(Self::TarBz2),
            "tar.xz" | "txz" => Some(Self::TarXz),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// External program that unpacks this archive type.
    pub fn extract_tool(self) -> &'static str {
        match self {
            Self::TarGz | Self::TarBz2 | Self::TarXz => "tar",
            Self::Zip => "unzip",
        }
    }

    pub fn infer_from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        let without_fragment = lower.split('#').next().unwrap_or(&lower);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);

        if without_query.ends_with(".tar.gz") || without_query.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if without_query.ends_with(".tar.bz2") || without_query.ends_with(".tbz2") {
            return Some(Self::TarBz2);
        }
        if without_query.ends_with(".tar.xz") || without_query.ends_with(".txz") {
            return Some(Self::TarXz);
        }
        if without_query.ends_with(".zip") {
            return Some(Self::Zip);
        }

        None
    }
}

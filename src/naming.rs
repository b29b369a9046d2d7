use chrono::NaiveDate;

pub const ALL_INDICES: &str = "_all";
pub const INDEX_DATE_FORMAT: &str = "%Y.%m.%d";

/// Prefix part of `{prefix}-{date}`; used to look up per-index settings.
/// Both date forms are stripped whole.
pub fn index_prefix(index: &str) -> &str {
    match split_dated(index) {
        Some((prefix, _)) if !prefix.is_empty() => prefix,
        _ => index.rsplit_once('-').map(|(prefix, _)| prefix).unwrap_or(index),
    }
}

pub fn index_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}", prefix, date.format(INDEX_DATE_FORMAT))
}

pub fn snapshot_name(index: &str) -> String {
    format!("snapshot_{index}")
}

/// Reverse of [`snapshot_name`].
pub fn index_from_snapshot(snapshot: &str) -> Option<&str> {
    snapshot.strip_prefix("snapshot_").filter(|s| !s.is_empty())
}

/// Date embedded at the end of an index name. Accepts `YYYY.MM.DD` and
/// `YYYY-MM-DD` suffixes.
pub fn parse_index_date(index: &str) -> Option<NaiveDate> {
    split_dated(index).map(|(_, date)| date)
}

/// `(prefix, date)` of a dated index name, without the joining dash.
fn split_dated(index: &str) -> Option<(&str, NaiveDate)> {
    if let Some((prefix, suffix)) = index.rsplit_once('-') {
        if let Ok(date) = NaiveDate::parse_from_str(suffix, INDEX_DATE_FORMAT) {
            return Some((prefix, date));
        }
    }

    let tail_start = index.len().checked_sub(10)?;
    let tail = index.get(tail_start..)?;
    let head = &index[..tail_start];
    let prefix = match head.strip_suffix('-') {
        Some(prefix) => prefix,
        None if head.is_empty() => head,
        None => return None,
    };
    let date = NaiveDate::parse_from_str(&tail.replace('-', "."), INDEX_DATE_FORMAT).ok()?;
    Some((prefix, date))
}

/// `{prefix}-{date}` for every prefix and every day of `[from, to]`.
pub fn expand_range(prefixes: &[String], from: NaiveDate, to: NaiveDate) -> Vec<String> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .flat_map(|day| prefixes.iter().map(move |p| index_name(p, day)))
        .collect()
}

pub fn is_all(prefixes: &[String]) -> bool {
    prefixes.len() == 1 && prefixes[0] == ALL_INDICES
}

use serde::Serialize;

use crate::models::User;

/// Conjunction of optional predicates over the students table.
/// Unset fields match everything, so the order filters are applied in is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub program: Option<String>,
    pub department: Option<String>,
    pub year: Option<u8>,
    pub gender: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LecturerFilter {
    pub search: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
}

fn matches_search(user: &User, needle: Option<&str>) -> bool {
    let needle = match needle.map(str::trim) {
        Some(needle) if !needle.is_empty() => needle.to_lowercase(),
        _ => return true,
    };
    [user.full_name(), user.email.clone(), user.id.clone()]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

fn matches_eq(value: Option<&str>, wanted: Option<&str>) -> bool {
    match wanted.map(str::trim) {
        None | Some("") => true,
        Some(wanted) => value.is_some_and(|value| value.trim().eq_ignore_ascii_case(wanted)),
    }
}

impl StudentFilter {
    pub fn matches(&self, user: &User) -> bool {
        matches_search(user, self.search.as_deref())
            && matches_eq(user.program.as_deref(), self.program.as_deref())
            && matches_eq(user.department.as_deref(), self.department.as_deref())
            && self.year.map_or(true, |year| user.year == Some(year))
            && matches_eq(user.gender.as_deref(), self.gender.as_deref())
            && matches_eq(user.status.as_deref(), self.status.as_deref())
    }

    pub fn apply<'a>(&self, users: &'a [User]) -> Vec<&'a User> {
        users
            .iter()
            .filter(|user| user.is_student() && self.matches(user))
            .collect()
    }
}

impl LecturerFilter {
    pub fn matches(&self, user: &User) -> bool {
        matches_search(user, self.search.as_deref())
            && matches_eq(user.department.as_deref(), self.department.as_deref())
            && matches_eq(user.status.as_deref(), self.status.as_deref())
    }

    pub fn apply<'a>(&self, users: &'a [User]) -> Vec<&'a User> {
        users
            .iter()
            .filter(|user| user.is_teacher() && self.matches(user))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    pub page: usize,
    pub page_count: usize,
    pub total: usize,
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1))
}

/// Fixed-size slice of `items`. Pages past the end are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let page = page.max(1);
    let start = (page - 1).saturating_mul(page_size).min(items.len());
    let end = start.saturating_add(page_size).min(items.len());

    Page {
        items: items[start..end].to_vec(),
        page,
        page_count: page_count(items.len(), page_size),
        total: items.len(),
    }
}

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::directory::Directory;
use crate::models::{AttendanceRecord, AttendanceStatus, RescheduleRequest, RescheduleStatus, User};

pub const ADMIN_TREND_WINDOW: usize = 30;
pub const LECTURER_TREND_WINDOW: usize = 20;
pub const STUDENT_RECENT_WINDOW: usize = 10;

const GENERAL: &str = "General";
const UNASSIGNED: &str = "Unassigned";
const UNKNOWN_COURSE: &str = "Unknown course";
const DEFAULT_GENDER: &str = "Male";
const DEFAULT_YEAR: u8 = 1;

/// Attendance rate as a whole percent; 0 for an empty scope.
pub fn percentage(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (present as f64 / total as f64 * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseRate {
    pub unit_id: String,
    pub name: String,
    pub code: String,
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRate {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    pub student_id: String,
    pub name: String,
    pub total: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub percentage: u32,
    pub units: Vec<Bucket>,
    pub recent: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub students: usize,
    pub teachers: usize,
    pub units: usize,
    pub records: usize,
    pub present: usize,
    pub percentage: u32,
    pub today_total: usize,
    pub today_present: usize,
    pub today_percentage: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LecturerOverview {
    pub teacher_id: String,
    pub units: Vec<CourseRate>,
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
    pub today_total: usize,
    pub today_present: usize,
    pub today_percentage: u32,
    pub pending_requests: usize,
    pub trend: Vec<TrendPoint>,
}

fn label_or(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => fallback.to_string(),
    }
}

fn capitalize(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Counts (present, total) per key. Every record lands in exactly one key.
fn tally<F>(records: &[AttendanceRecord], key: F) -> HashMap<String, (usize, usize)>
where
    F: Fn(&AttendanceRecord) -> String,
{
    let mut map: HashMap<String, (usize, usize)> = HashMap::new();
    for record in records {
        let entry = map.entry(key(record)).or_insert((0, 0));
        if record.is_present() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
    map
}

fn into_buckets(map: HashMap<String, (usize, usize)>) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = map
        .into_iter()
        .map(|(name, (present, total))| Bucket {
            name,
            total,
            present,
            percentage: percentage(present, total),
        })
        .collect();
    buckets.sort_by(|a, b| {
        b.percentage
            .cmp(&a.percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    buckets
}

pub fn by_department(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    into_buckets(tally(records, |record| {
        label_or(
            directory
                .unit(&record.unit_id)
                .and_then(|unit| unit.department.as_deref()),
            GENERAL,
        )
    }))
}

pub fn by_program(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    into_buckets(tally(records, |record| {
        label_or(
            directory
                .user(&record.student_id)
                .and_then(|student| student.program.as_deref()),
            GENERAL,
        )
    }))
}

pub fn by_year(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    into_buckets(tally(records, |record| {
        let year = directory
            .user(&record.student_id)
            .and_then(|student| student.year)
            .unwrap_or(DEFAULT_YEAR);
        format!("Year {year}")
    }))
}

pub fn by_gender(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    into_buckets(tally(records, |record| {
        let gender = label_or(
            directory
                .user(&record.student_id)
                .and_then(|student| student.gender.as_deref()),
            DEFAULT_GENDER,
        );
        capitalize(&gender)
    }))
}

pub fn by_room(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    into_buckets(tally(records, |record| {
        label_or(directory.room_of_unit(&record.unit_id), UNASSIGNED)
    }))
}

/// Keyed by teacher id so namesakes stay apart; labelled with the full name.
pub fn by_lecturer(records: &[AttendanceRecord], directory: &Directory) -> Vec<Bucket> {
    let map = tally(records, |record| {
        directory
            .teacher_of_unit(&record.unit_id)
            .map(|teacher| teacher.id.clone())
            .unwrap_or_default()
    });

    let named: Vec<(String, String, (usize, usize))> = map
        .into_iter()
        .map(|(teacher_id, counts)| {
            let name = directory
                .user(&teacher_id)
                .map(User::full_name)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNASSIGNED.to_string());
            (name, teacher_id, counts)
        })
        .collect();

    let mut name_uses: HashMap<&str, usize> = HashMap::new();
    for (name, id, _) in &named {
        if !id.is_empty() {
            *name_uses.entry(name.as_str()).or_insert(0) += 1;
        }
    }

    // Every lecturer sharing a name gets the id suffix, whatever the map order.
    let mut relabelled: HashMap<String, (usize, usize)> = HashMap::new();
    for (name, id, (present, total)) in &named {
        let shared = name_uses.get(name.as_str()).copied().unwrap_or(0) > 1;
        let label = if shared && !id.is_empty() {
            format!("{name} ({id})")
        } else {
            name.clone()
        };
        let entry = relabelled.entry(label).or_insert((0, 0));
        entry.0 += present;
        entry.1 += total;
    }

    into_buckets(relabelled)
}

pub fn by_course(records: &[AttendanceRecord], directory: &Directory) -> Vec<CourseRate> {
    let map = tally(records, |record| record.unit_id.clone());
    let mut courses: Vec<CourseRate> = map
        .into_iter()
        .map(|(unit_id, (present, total))| {
            let unit = directory.unit(&unit_id);
            CourseRate {
                name: unit
                    .map(|unit| unit.name.clone())
                    .unwrap_or_else(|| UNKNOWN_COURSE.to_string()),
                code: unit.map(|unit| unit.code.clone()).unwrap_or_default(),
                unit_id,
                total,
                present,
                percentage: percentage(present, total),
            }
        })
        .collect();
    courses.sort_by(|a, b| {
        b.percentage
            .cmp(&a.percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    courses
}

/// Per-day rates in ascending date order, keeping only the last `window` days.
pub fn daily_trend(records: &[AttendanceRecord], window: usize) -> Vec<TrendPoint> {
    let mut days: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = days.entry(record.date).or_insert((0, 0));
        if record.is_present() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    let skip = days.len().saturating_sub(window);
    days.into_iter()
        .skip(skip)
        .map(|(date, (present, total))| TrendPoint {
            date,
            total,
            present,
            percentage: percentage(present, total),
        })
        .collect()
}

pub fn student_rates(students: &[User], records: &[AttendanceRecord]) -> Vec<StudentRate> {
    let counts = tally(records, |record| record.student_id.clone());
    students
        .iter()
        .map(|student| {
            let (present, total) = counts.get(&student.id).copied().unwrap_or((0, 0));
            StudentRate {
                student_id: student.id.clone(),
                name: student.full_name(),
                email: student.email.clone(),
                total,
                present,
                percentage: percentage(present, total),
            }
        })
        .collect()
}

/// Students with at least one record whose rate is below `threshold`, lowest first.
pub fn at_risk_students(
    students: &[User],
    records: &[AttendanceRecord],
    threshold: u32,
) -> Vec<StudentRate> {
    let mut rates: Vec<StudentRate> = student_rates(students, records)
        .into_iter()
        .filter(|rate| rate.total > 0 && rate.percentage < threshold)
        .collect();
    rates.sort_by(|a, b| {
        a.percentage
            .cmp(&b.percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    rates
}

pub fn student_detail(
    student_id: &str,
    records: &[AttendanceRecord],
    directory: &Directory,
) -> StudentDetail {
    let mut own: Vec<AttendanceRecord> = records
        .iter()
        .filter(|record| record.student_id == student_id)
        .cloned()
        .collect();

    let count = |status: AttendanceStatus| own.iter().filter(|r| r.status == status).count();
    let present = count(AttendanceStatus::Present);
    let late = count(AttendanceStatus::Late);
    let absent = count(AttendanceStatus::Absent);
    let total = own.len();

    let units = into_buckets(tally(&own, |record| {
        directory
            .unit(&record.unit_id)
            .map(|unit| unit.name.clone())
            .unwrap_or_else(|| UNKNOWN_COURSE.to_string())
    }));

    own.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.time.cmp(&b.time)));
    let recent = own.split_off(own.len().saturating_sub(STUDENT_RECENT_WINDOW));

    StudentDetail {
        student_id: student_id.to_string(),
        name: directory
            .user(student_id)
            .map(User::full_name)
            .unwrap_or_else(|| student_id.to_string()),
        total,
        present,
        late,
        absent,
        percentage: percentage(present, total),
        units,
        recent,
    }
}

pub fn summary(
    users: &[User],
    unit_count: usize,
    records: &[AttendanceRecord],
    today: NaiveDate,
) -> DashboardSummary {
    let present = records.iter().filter(|r| r.is_present()).count();
    let todays: Vec<&AttendanceRecord> = records.iter().filter(|r| r.date == today).collect();
    let today_present = todays.iter().filter(|r| r.is_present()).count();

    DashboardSummary {
        students: users.iter().filter(|u| u.is_student()).count(),
        teachers: users.iter().filter(|u| u.is_teacher()).count(),
        units: unit_count,
        records: records.len(),
        present,
        percentage: percentage(present, records.len()),
        today_total: todays.len(),
        today_present,
        today_percentage: percentage(today_present, todays.len()),
    }
}

pub fn lecturer_overview(
    teacher_id: &str,
    records: &[AttendanceRecord],
    requests: &[RescheduleRequest],
    directory: &Directory,
    today: NaiveDate,
) -> LecturerOverview {
    let taught: Vec<String> = directory
        .units_taught_by(teacher_id)
        .into_iter()
        .map(|unit| unit.id.clone())
        .collect();
    let own: Vec<AttendanceRecord> = records
        .iter()
        .filter(|record| taught.contains(&record.unit_id))
        .cloned()
        .collect();

    let mut units = by_course(&own, directory);
    for unit_id in &taught {
        if !units.iter().any(|course| &course.unit_id == unit_id) {
            if let Some(unit) = directory.unit(unit_id) {
                units.push(CourseRate {
                    unit_id: unit.id.clone(),
                    name: unit.name.clone(),
                    code: unit.code.clone(),
                    total: 0,
                    present: 0,
                    percentage: 0,
                });
            }
        }
    }

    let present = own.iter().filter(|r| r.is_present()).count();
    let today_total = own.iter().filter(|r| r.date == today).count();
    let today_present = own
        .iter()
        .filter(|r| r.date == today && r.is_present())
        .count();

    LecturerOverview {
        teacher_id: teacher_id.to_string(),
        total: own.len(),
        present,
        percentage: percentage(present, own.len()),
        today_total,
        today_present,
        today_percentage: percentage(today_present, today_total),
        pending_requests: requests
            .iter()
            .filter(|r| r.teacher_id == teacher_id && r.status == RescheduleStatus::Pending)
            .count(),
        trend: daily_trend(&own, LECTURER_TREND_WINDOW),
        units,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, TimetableSlot, Unit};
    use chrono::Duration;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(n)
    }

    fn record(
        id: usize,
        student: &str,
        unit: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> AttendanceRecord {
        AttendanceRecord {
            id: format!("r{id}"),
            student_id: student.into(),
            unit_id: unit.into(),
            date,
            status,
            time: Some(format!("08:{:02}", id % 60)),
            timestamp: None,
        }
    }

    fn user(
        id: &str,
        role: Role,
        program: Option<&str>,
        year: Option<u8>,
        gender: Option<&str>,
    ) -> User {
        User {
            id: id.into(),
            role,
            first_name: id.to_uppercase(),
            last_name: "Tester".into(),
            email: format!("{id}@example.com"),
            gender: gender.map(str::to_string),
            program: program.map(str::to_string),
            department: None,
            year,
            streak: 0,
            selected_units: vec![],
            total_classes: 0,
            attended_classes: 0,
            status: None,
            institution_id: None,
        }
    }

    fn unit(id: &str, department: Option<&str>, teacher: Option<&str>) -> Unit {
        Unit {
            id: id.into(),
            name: format!("Course {id}"),
            code: id.to_uppercase(),
            department: department.map(str::to_string),
            teacher_id: teacher.map(str::to_string),
            class_id: None,
            enrolled_students: vec![],
        }
    }

    fn fixture() -> (Vec<User>, Vec<Unit>, Vec<AttendanceRecord>) {
        let users = vec![
            user("s1", Role::Student, Some("BSc CS"), Some(2), Some("female")),
            user("s2", Role::Student, None, None, None),
            user("t1", Role::Teacher, None, None, None),
        ];
        let units = vec![unit("u1", Some("Computing"), Some("t1")), unit("u2", None, None)];
        let records = vec![
            record(1, "s1", "u1", day(0), AttendanceStatus::Present),
            record(2, "s1", "u2", day(0), AttendanceStatus::Absent),
            record(3, "s2", "u1", day(1), AttendanceStatus::Late),
            record(4, "s2", "u1", day(1), AttendanceStatus::Present),
            record(5, "ghost", "missing", day(2), AttendanceStatus::Present),
        ];
        (users, units, records)
    }

    #[test]
    fn percentage_rounds_and_handles_empty_scope() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(5, 5), 100);
    }

    #[test]
    fn six_of_ten_present_is_sixty_percent() {
        let records: Vec<AttendanceRecord> = (0..10)
            .map(|i| {
                let status = if i < 6 {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                };
                record(i, &format!("s{i}"), "u1", day(0), status)
            })
            .collect();
        let units = vec![unit("u1", Some("Computing"), None)];
        let directory = Directory::new(&[], &units);

        let courses = by_course(&records, &directory);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].percentage, 60);
        assert_eq!(courses[0].total, 10);
    }

    #[test]
    fn every_record_lands_in_exactly_one_bucket() {
        let (users, units, records) = fixture();
        let directory = Directory::new(&users, &units);

        for buckets in [
            by_department(&records, &directory),
            by_program(&records, &directory),
            by_year(&records, &directory),
            by_gender(&records, &directory),
            by_room(&records, &directory),
            by_lecturer(&records, &directory),
        ] {
            let total: usize = buckets.iter().map(|b| b.total).sum();
            assert_eq!(total, records.len());
            assert!(buckets.iter().all(|b| b.percentage <= 100));
        }
    }

    #[test]
    fn missing_keys_fall_back_to_default_labels() {
        let (users, units, records) = fixture();
        let directory = Directory::new(&users, &units);

        let departments = by_department(&records, &directory);
        let general = departments.iter().find(|b| b.name == "General").unwrap();
        assert_eq!(general.total, 2);

        let years = by_year(&records, &directory);
        assert_eq!(years.iter().find(|b| b.name == "Year 1").unwrap().total, 3);

        let genders = by_gender(&records, &directory);
        assert_eq!(genders.iter().find(|b| b.name == "Male").unwrap().total, 3);
        assert_eq!(genders.iter().find(|b| b.name == "Female").unwrap().total, 2);

        let lecturers = by_lecturer(&records, &directory);
        assert_eq!(lecturers.iter().find(|b| b.name == "Unassigned").unwrap().total, 2);
        assert_eq!(lecturers.iter().find(|b| b.name == "T1 Tester").unwrap().total, 3);
    }

    #[test]
    fn namesake_lecturers_are_all_suffixed_with_their_id() {
        let namesake = |id: &str| User {
            first_name: "Sam".into(),
            last_name: "Otieno".into(),
            ..user(id, Role::Teacher, None, None, None)
        };
        let users = vec![namesake("t1"), namesake("t2")];
        let units = vec![unit("u1", None, Some("t1")), unit("u2", None, Some("t2"))];
        let records = vec![
            record(1, "s1", "u1", day(0), AttendanceStatus::Present),
            record(2, "s1", "u2", day(0), AttendanceStatus::Absent),
        ];
        let directory = Directory::new(&users, &units);

        for _ in 0..50 {
            let mut names: Vec<(String, u32)> = by_lecturer(&records, &directory)
                .into_iter()
                .map(|b| (b.name, b.percentage))
                .collect();
            names.sort();
            assert_eq!(
                names,
                vec![
                    ("Sam Otieno (t1)".to_string(), 100),
                    ("Sam Otieno (t2)".to_string(), 0),
                ]
            );
        }
    }

    #[test]
    fn rooms_come_from_the_timetable() {
        let (users, units, records) = fixture();
        let slots = vec![TimetableSlot {
            id: None,
            class_id: "c1".into(),
            day: "Monday".into(),
            period: Some(1),
            start_time: "08:00".into(),
            end_time: "10:00".into(),
            unit_id: "u1".into(),
            room: Some("LT-1".into()),
        }];
        let directory = Directory::new(&users, &units).with_rooms(&slots);

        let rooms = by_room(&records, &directory);
        let lt1 = rooms.iter().find(|b| b.name == "LT-1").unwrap();
        assert_eq!((lt1.present, lt1.total, lt1.percentage), (2, 3, 67));
    }

    #[test]
    fn buckets_are_ranked_by_percentage() {
        let (users, units, records) = fixture();
        let directory = Directory::new(&users, &units);
        let buckets = by_department(&records, &directory);
        assert!(buckets.windows(2).all(|w| w[0].percentage >= w[1].percentage));
    }

    #[test]
    fn trend_is_ascending_and_capped() {
        let records: Vec<AttendanceRecord> = (0..45)
            .rev()
            .map(|n| record(n as usize, "s1", "u1", day(n), AttendanceStatus::Present))
            .collect();

        let trend = daily_trend(&records, ADMIN_TREND_WINDOW);
        assert_eq!(trend.len(), 30);
        assert!(trend.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(trend.last().unwrap().date, day(44));
        assert_eq!(trend.first().unwrap().date, day(15));
    }

    #[test]
    fn student_detail_keeps_last_ten_records_in_order() {
        let (users, units, _) = fixture();
        let directory = Directory::new(&users, &units);
        let records: Vec<AttendanceRecord> = (0..14)
            .map(|n| {
                let status = if n % 2 == 0 {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Late
                };
                record(n as usize, "s1", "u1", day(13 - n), status)
            })
            .collect();

        let detail = student_detail("s1", &records, &directory);
        assert_eq!(detail.total, 14);
        assert_eq!(detail.present, 7);
        assert_eq!(detail.late, 7);
        assert_eq!(detail.percentage, 50);
        assert_eq!(detail.recent.len(), 10);
        assert!(detail.recent.windows(2).all(|w| w[0].date <= w[1].date));
        assert_eq!(detail.recent.last().unwrap().date, day(13));
    }

    #[test]
    fn summary_counts_today_separately() {
        let (users, units, records) = fixture();
        let summary = summary(&users, units.len(), &records, day(1));
        assert_eq!(summary.students, 2);
        assert_eq!(summary.teachers, 1);
        assert_eq!(summary.records, 5);
        assert_eq!(summary.percentage, 60);
        assert_eq!((summary.today_present, summary.today_total), (1, 2));
        assert_eq!(summary.today_percentage, 50);
    }

    #[test]
    fn at_risk_lists_lowest_rates_first() {
        let (users, _, records) = fixture();
        let students: Vec<User> = users.into_iter().filter(User::is_student).collect();
        let risky = at_risk_students(&students, &records, 75);
        let ids: Vec<&str> = risky.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn lecturer_overview_covers_units_without_records() {
        let (users, mut units, records) = fixture();
        units.push(unit("u3", Some("Computing"), Some("t1")));
        let directory = Directory::new(&users, &units);
        let requests = vec![RescheduleRequest {
            id: "rr1".into(),
            teacher_id: "t1".into(),
            unit_id: Some("u1".into()),
            unit_name: None,
            status: RescheduleStatus::Pending,
            original_day: None,
            original_time: None,
            new_date: None,
            new_time: None,
            requested_at: None,
            reason: None,
        }];

        let overview = lecturer_overview("t1", &records, &requests, &directory, day(1));
        assert_eq!(overview.units.len(), 2);
        assert_eq!(overview.total, 3);
        assert_eq!(overview.percentage, 67);
        assert_eq!(overview.today_total, 2);
        assert_eq!(overview.pending_requests, 1);
    }
}

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{Duration, Local, NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info};

use crate::aggregate::{self, Bucket, CourseRate, DashboardSummary, TrendPoint};
use crate::api::ApiClient;
use crate::config::AppConfig;
use crate::directory::Directory;
use crate::error::ApiError;
use crate::export::{self, ReportInput};
use crate::filter::{paginate, LecturerFilter, Page, StudentFilter};
use crate::live;
use crate::models::{
    AttendanceRecord, Goal, Institution, RescheduleStatus, Reward, Task, TimetableSlot, User,
};
use crate::qr::{self, QrConsole, StartRequest};
use crate::rewards::{self, RewardBook};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dimension {
    Department,
    Program,
    Year,
    Gender,
    Room,
    Lecturer,
    Course,
    Date,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_buckets(title: &str, buckets: &[Bucket]) {
    println!("{title}:");
    if buckets.is_empty() {
        println!("  (no attendance recorded)");
    }
    for bucket in buckets {
        println!(
            "  {:<28} {:>3}%  ({} of {} present)",
            bucket.name, bucket.percentage, bucket.present, bucket.total
        );
    }
}

fn print_courses(courses: &[CourseRate]) {
    println!("Attendance by course:");
    for course in courses {
        println!(
            "  {:<10} {:<28} {:>3}%  ({} of {} present)",
            course.code, course.name, course.percentage, course.present, course.total
        );
    }
}

fn print_trend(trend: &[TrendPoint]) {
    println!("Daily trend:");
    for point in trend {
        println!(
            "  {}  {:>3}%  ({} of {} present)",
            point.date, point.percentage, point.present, point.total
        );
    }
}

fn print_summary(summary: &DashboardSummary) {
    println!(
        "{} students, {} lecturers, {} units",
        summary.students, summary.teachers, summary.units
    );
    println!(
        "Overall attendance {}% ({} of {} records present)",
        summary.percentage, summary.present, summary.records
    );
    println!(
        "Today {}% ({} of {} present)",
        summary.today_percentage, summary.today_present, summary.today_total
    );
}

fn print_page(page: &Page<&User>) {
    if page.total == 0 {
        println!("No matching users.");
        return;
    }
    for user in &page.items {
        println!(
            "- {} {} <{}> {} {}",
            user.id,
            user.full_name(),
            user.email,
            user.program
                .as_deref()
                .or(user.department.as_deref())
                .unwrap_or("-"),
            user.status.as_deref().unwrap_or("")
        );
    }
    println!("Page {} of {} ({} total)", page.page, page.page_count, page.total);
}

pub async fn dashboard(client: &ApiClient) -> anyhow::Result<()> {
    let (users, units, records, slots) = tokio::try_join!(
        client.users(),
        client.units(),
        client.attendance(),
        client.timetable()
    )
    .context("failed to load dashboard data")?;
    let directory = Directory::new(&users, &units).with_rooms(&slots);

    print_summary(&aggregate::summary(&users, units.len(), &records, today()));
    println!();
    print_buckets("Attendance by department", &aggregate::by_department(&records, &directory));
    print_buckets("Attendance by program", &aggregate::by_program(&records, &directory));
    print_buckets("Attendance by year", &aggregate::by_year(&records, &directory));
    print_buckets("Attendance by gender", &aggregate::by_gender(&records, &directory));
    Ok(())
}

pub async fn breakdown(client: &ApiClient, dimension: Dimension) -> anyhow::Result<()> {
    let (users, units, records, slots) = tokio::try_join!(
        client.users(),
        client.units(),
        client.attendance(),
        client.timetable()
    )
    .context("failed to load attendance data")?;
    let directory = Directory::new(&users, &units).with_rooms(&slots);

    let (title, buckets) = match dimension {
        Dimension::Department => ("department", aggregate::by_department(&records, &directory)),
        Dimension::Program => ("program", aggregate::by_program(&records, &directory)),
        Dimension::Year => ("year", aggregate::by_year(&records, &directory)),
        Dimension::Gender => ("gender", aggregate::by_gender(&records, &directory)),
        Dimension::Room => ("room", aggregate::by_room(&records, &directory)),
        Dimension::Lecturer => ("lecturer", aggregate::by_lecturer(&records, &directory)),
        Dimension::Course => {
            print_courses(&aggregate::by_course(&records, &directory));
            return Ok(());
        }
        Dimension::Date => {
            print_trend(&aggregate::daily_trend(&records, aggregate::ADMIN_TREND_WINDOW));
            return Ok(());
        }
    };
    print_buckets(&format!("Attendance by {title}"), &buckets);
    Ok(())
}

pub async fn students(
    client: &ApiClient,
    config: &AppConfig,
    filter: &StudentFilter,
    page: usize,
    export_to: Option<&Path>,
) -> anyhow::Result<()> {
    let (users, records) = tokio::try_join!(client.users(), client.attendance())
        .context("failed to load students")?;
    let matching = filter.apply(&users);

    if let Some(path) = export_to {
        let owned: Vec<User> = matching.iter().map(|u| (*u).clone()).collect();
        let rates = aggregate::student_rates(&owned, &records);
        let file = create_file(path)?;
        export::write_students_csv(file, &matching, &rates)?;
        println!("Exported {} students to {}.", matching.len(), path.display());
        return Ok(());
    }

    print_page(&paginate(&matching, page, config.page_size));
    Ok(())
}

pub async fn lecturers(
    client: &ApiClient,
    config: &AppConfig,
    filter: &LecturerFilter,
    page: usize,
    export_to: Option<&Path>,
) -> anyhow::Result<()> {
    let (users, units) = tokio::try_join!(client.users(), client.units())
        .context("failed to load lecturers")?;
    let matching = filter.apply(&users);

    if let Some(path) = export_to {
        let mut unit_counts: HashMap<String, usize> = HashMap::new();
        for teacher_id in units.iter().filter_map(|u| u.teacher_id.clone()) {
            *unit_counts.entry(teacher_id).or_insert(0) += 1;
        }
        let file = create_file(path)?;
        export::write_lecturers_csv(file, &matching, &unit_counts)?;
        println!("Exported {} lecturers to {}.", matching.len(), path.display());
        return Ok(());
    }

    print_page(&paginate(&matching, page, config.page_size));
    Ok(())
}

fn create_file(path: &Path) -> anyhow::Result<File> {
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

pub async fn export_summary(client: &ApiClient, out: &Path) -> anyhow::Result<()> {
    let (users, units, records) =
        tokio::try_join!(client.users(), client.units(), client.attendance())
            .context("failed to load dashboard data")?;
    let directory = Directory::new(&users, &units);
    let summary = aggregate::summary(&users, units.len(), &records, today());
    let departments = aggregate::by_department(&records, &directory);
    let programs = aggregate::by_program(&records, &directory);
    let years = aggregate::by_year(&records, &directory);

    let file = create_file(out)?;
    export::write_summary_csv(
        file,
        &summary,
        &[
            ("Department", departments.as_slice()),
            ("Program", programs.as_slice()),
            ("Year", years.as_slice()),
        ],
    )?;
    println!("Summary written to {}.", out.display());
    Ok(())
}

/// Narrows users to one department and records to that department's students.
fn scope_to_department(
    users: Vec<User>,
    records: Vec<AttendanceRecord>,
    department: &str,
) -> (Vec<User>, Vec<AttendanceRecord>) {
    let students = StudentFilter {
        department: Some(department.to_string()),
        ..Default::default()
    };
    let lecturers = LecturerFilter {
        department: Some(department.to_string()),
        ..Default::default()
    };
    let users: Vec<User> = users
        .into_iter()
        .filter(|u| {
            (u.is_student() && students.matches(u)) || (u.is_teacher() && lecturers.matches(u))
        })
        .collect();
    let in_scope: HashSet<&str> = users
        .iter()
        .filter(|u| u.is_student())
        .map(|u| u.id.as_str())
        .collect();
    let records = records
        .into_iter()
        .filter(|r| in_scope.contains(r.student_id.as_str()))
        .collect();
    (users, records)
}

pub async fn report(
    client: &ApiClient,
    out: &Path,
    threshold: u32,
    department: Option<&str>,
) -> anyhow::Result<()> {
    let (users, units, records) =
        tokio::try_join!(client.users(), client.units(), client.attendance())
            .context("failed to load report data")?;
    let (users, records) = match department {
        Some(department) => scope_to_department(users, records, department),
        None => (users, records),
    };
    let directory = Directory::new(&users, &units);
    let students: Vec<User> = users.iter().filter(|u| u.is_student()).cloned().collect();

    let summary = aggregate::summary(&users, units.len(), &records, today());
    let departments = aggregate::by_department(&records, &directory);
    let programs = aggregate::by_program(&records, &directory);
    let years = aggregate::by_year(&records, &directory);
    let at_risk = aggregate::at_risk_students(&students, &records, threshold);
    let trend = aggregate::daily_trend(&records, aggregate::ADMIN_TREND_WINDOW);

    let report = export::build_report(&ReportInput {
        scope: department,
        generated_on: today(),
        summary: &summary,
        departments: &departments,
        programs: &programs,
        years: &years,
        at_risk: &at_risk,
        trend: &trend,
    });
    std::fs::write(out, report).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Report written to {}.", out.display());
    Ok(())
}

pub async fn student(
    client: &ApiClient,
    session: &Session,
    id: Option<&str>,
) -> anyhow::Result<()> {
    let id = resolve_user_id(session, id)?;
    let (users, units, records, institutions) = tokio::try_join!(
        client.users(),
        client.units(),
        client.attendance(),
        client.institutions()
    )
    .context("failed to load student data")?;
    let directory = Directory::new(&users, &units);
    let student = directory
        .user(&id)
        .with_context(|| format!("no user with id {id}"))?;

    let detail = aggregate::student_detail(&id, &records, &directory);
    println!("{} ({})", detail.name, student.email);
    println!(
        "Attendance {}%: {} present, {} late, {} absent of {}",
        detail.percentage, detail.present, detail.late, detail.absent, detail.total
    );
    print_buckets("By unit", &detail.units);
    println!("Recent records:");
    for record in &detail.recent {
        let unit = directory
            .unit(&record.unit_id)
            .map(|u| u.name.as_str())
            .unwrap_or(record.unit_id.as_str());
        println!("  {} {:<28} {:?}", record.date, unit, record.status);
    }

    if let Some(institution) = pick_institution(&institutions, student.institution_id.as_deref()) {
        print_progress(student.streak, &institution.rewards);
    }
    Ok(())
}

fn print_progress(streak: u32, rewards: &[Reward]) {
    let progress = rewards::progress(streak, rewards);
    println!(
        "Streak {} days, {} of {} rewards unlocked",
        progress.streak,
        progress.unlocked,
        rewards.len()
    );
    match &progress.next {
        Some(next) => println!(
            "Next: {} at {} days ({}% there)",
            next.reward, next.milestone, progress.progress_percent
        ),
        None => println!("All rewards unlocked."),
    }
}

pub async fn lecturer(
    client: &ApiClient,
    session: &Session,
    id: Option<&str>,
) -> anyhow::Result<()> {
    let id = resolve_user_id(session, id)?;
    let (users, units, records, requests) = tokio::try_join!(
        client.users(),
        client.units(),
        client.attendance(),
        client.reschedule_requests()
    )
    .context("failed to load lecturer data")?;
    let directory = Directory::new(&users, &units);
    let overview = aggregate::lecturer_overview(&id, &records, &requests, &directory, today());

    let name = directory.user(&id).map(User::full_name).unwrap_or_else(|| id.clone());
    println!(
        "{name}: {} units, {} pending reschedule requests",
        overview.units.len(),
        overview.pending_requests
    );
    println!(
        "Overall {}% ({} of {}), today {}% ({} of {})",
        overview.percentage,
        overview.present,
        overview.total,
        overview.today_percentage,
        overview.today_present,
        overview.today_total
    );
    print_courses(&overview.units);
    print_trend(&overview.trend);
    Ok(())
}

pub async fn live_summary(client: &ApiClient, config: &AppConfig) -> anyhow::Result<()> {
    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop.send(true);
        }
    });

    info!(every = ?config.poll_interval, "watching live summary");
    let stats = live::poll(
        config.poll_interval,
        shutdown,
        move || fetch_live_summary(client),
        |summary| {
            println!("[{}]", Local::now().format("%H:%M:%S"));
            print_summary(summary);
        },
    )
    .await;
    info!(ticks = stats.ticks, failures = stats.failures, "live summary stopped");
    Ok(())
}

/// One live tick: attendance and users are refetched, units may come from the cache.
async fn fetch_live_summary(client: &ApiClient) -> Result<DashboardSummary, ApiError> {
    client.cache().invalidate("attendance").await;
    client.cache().invalidate("users").await;
    let (users, units, records) =
        tokio::try_join!(client.users(), client.units(), client.attendance())?;
    Ok(aggregate::summary(&users, units.len(), &records, today()))
}

fn resolve_user_id(session: &Session, id: Option<&str>) -> anyhow::Result<String> {
    match id.or(session.user_id()) {
        Some(id) => Ok(id.to_string()),
        None => bail!("no user id given and the session has no profile"),
    }
}

fn pick_institution<'a>(
    institutions: &'a [Institution],
    preferred: Option<&str>,
) -> Option<&'a Institution> {
    preferred
        .and_then(|id| institutions.iter().find(|i| i.id == id))
        .or_else(|| institutions.first())
}

async fn load_institution(
    client: &ApiClient,
    session: &Session,
    id: Option<&str>,
) -> anyhow::Result<Institution> {
    if let Some(id) = id {
        return client
            .institution(id)
            .await
            .with_context(|| format!("failed to load institution {id}"));
    }
    let institutions = client.institutions().await.context("failed to load institutions")?;
    let preferred = session.user.as_ref().and_then(|u| u.institution_id.as_deref());
    pick_institution(&institutions, preferred)
        .cloned()
        .context("no institution configured")
}

pub enum RewardAction {
    List,
    Add(Reward),
    Edit(usize, Reward),
    Delete(usize),
}

pub async fn manage_rewards(
    client: &ApiClient,
    session: &Session,
    institution: Option<&str>,
    action: RewardAction,
) -> anyhow::Result<()> {
    let institution = load_institution(client, session, institution).await?;
    let mut book = RewardBook::new(institution.rewards.clone());

    let changed = match action {
        RewardAction::List => false,
        RewardAction::Add(reward) => {
            book.add(reward)?;
            true
        }
        RewardAction::Edit(index, reward) => {
            book.edit(index, reward)?;
            true
        }
        RewardAction::Delete(index) => {
            let removed = book.delete(index)?;
            println!("Removed {} ({} days).", removed.reward, removed.milestone);
            true
        }
    };

    if changed {
        client
            .replace_rewards(&institution.id, book.rewards())
            .await
            .context("failed to save rewards")?;
    }

    println!("Rewards for {}:", institution.name);
    if book.rewards().is_empty() {
        println!("  (none configured)");
    }
    for (index, reward) in book.rewards().iter().enumerate() {
        println!(
            "  [{index}] {:>4} days  {}  {}",
            reward.milestone, reward.reward, reward.description
        );
    }
    Ok(())
}

fn qr_secret(config: &AppConfig) -> anyhow::Result<&str> {
    config
        .qr_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .context("ATTENDANCE_QR_SECRET must be set to sign attendance codes")
}

pub async fn qr_start(
    client: &ApiClient,
    session: &Session,
    config: &AppConfig,
    unit_id: &str,
    class_id: Option<&str>,
    ttl_minutes: i64,
) -> anyhow::Result<()> {
    let secret = qr_secret(config)?;
    let teacher_id = resolve_user_id(session, None)?;
    let units = client.units().await.context("failed to load units")?;
    let unit = units
        .iter()
        .find(|u| u.id == unit_id)
        .with_context(|| format!("no unit with id {unit_id}"))?;

    let ttl = Duration::try_minutes(ttl_minutes.max(1))
        .with_context(|| format!("--ttl-minutes {ttl_minutes} is out of range"))?;
    let mut console = QrConsole::new(secret)?;
    let started = console
        .start(
            StartRequest {
                unit_id: unit.id.clone(),
                class_id: class_id
                    .map(str::to_string)
                    .or_else(|| unit.class_id.clone())
                    .unwrap_or_default(),
                teacher_id,
                enrolled: unit.enrolled_students.clone(),
            },
            Utc::now(),
            ttl,
        )?
        .clone();

    if let Err(err) = client.create_qr_session(&started).await {
        error!(error = %err, "failed to register attendance session");
        return Err(err).context("failed to register attendance session");
    }

    let expires_at = console
        .active()
        .map(|active| active.expires_at)
        .context("attendance session did not start")?;

    println!("Attendance code for {} ({}):", unit.name, unit.code);
    println!("{}", started.qr_code);
    println!(
        "Valid until {} UTC. Press Ctrl-C to close early.",
        expires_at.format("%Y-%m-%d %H:%M")
    );
    println!("Scans are read from stdin as `<student id> <code>`.");

    let remaining = (expires_at - Utc::now()).to_std().unwrap_or_default();
    let deadline = tokio::time::sleep(remaining);
    tokio::pin!(deadline);
    let mut scans = BufReader::new(tokio::io::stdin()).lines();
    let mut reading = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            line = scans.next_line(), if reading => {
                let Some(line) = line.context("failed to read scan")? else {
                    // stdin closed; the session stays open until expiry or Ctrl-C
                    reading = false;
                    continue;
                };
                let scan = line.trim().split_once(char::is_whitespace);
                let Some((student_id, token)) = scan else {
                    continue;
                };
                match console.verify(token.trim(), student_id, Utc::now()) {
                    Ok(count) => println!("{student_id} marked present ({count} scans)"),
                    Err(err) => println!("{student_id} rejected: {err}"),
                }
            }
        }
    }

    let closed = console.close()?.clone();
    client
        .close_qr_session(&closed)
        .await
        .context("failed to close attendance session")?;
    println!("Session {} closed with {} scans.", closed.id, closed.scan_count);
    Ok(())
}

/// Checks a scanned code offline: signature, expiry, unit and enrollment.
pub async fn qr_verify(
    client: &ApiClient,
    config: &AppConfig,
    token: &str,
    student_id: &str,
) -> anyhow::Result<()> {
    let secret = qr_secret(config)?;
    let claims = qr::verify_token(secret.as_bytes(), token, Utc::now())?;
    let units = client.units().await.context("failed to load units")?;
    let unit = units
        .iter()
        .find(|u| u.id == claims.unit)
        .with_context(|| format!("code refers to unknown unit {}", claims.unit))?;
    if !unit.enrolled_students.iter().any(|s| s == student_id) {
        bail!("student {student_id} is not enrolled in {}", unit.name);
    }
    println!("Valid code for {} (session {}).", unit.name, claims.sid);
    Ok(())
}

pub enum TaskAction {
    List,
    Add(Task),
    Done(String),
    Delete(String),
}

pub async fn tasks(client: &ApiClient, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::List => {}
        TaskAction::Add(task) => {
            client.create_task(&task).await.context("failed to create task")?;
        }
        TaskAction::Done(id) => {
            client
                .set_task_completed(&id, true)
                .await
                .context("failed to update task")?;
        }
        TaskAction::Delete(id) => {
            client.delete_task(&id).await.context("failed to delete task")?;
        }
    }

    let tasks = client.tasks().await.context("failed to load tasks")?;
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in tasks {
        println!(
            "[{}] {} {}{}",
            if task.completed { "x" } else { " " },
            task.id.as_deref().unwrap_or("-"),
            task.title,
            task.due_date
                .map(|d| format!(" (due {d})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn goals(client: &ApiClient, add: Option<Goal>) -> anyhow::Result<()> {
    if let Some(goal) = add {
        client.create_goal(&goal).await.context("failed to create goal")?;
    }
    let goals = client.goals().await.context("failed to load goals")?;
    if goals.is_empty() {
        println!("No goals.");
    }
    for goal in goals {
        println!(
            "- {}: {}/{} ({}%)",
            goal.title,
            goal.progress,
            goal.target,
            aggregate::percentage(goal.progress as usize, goal.target as usize)
        );
    }
    Ok(())
}

pub enum TimetableAction {
    List,
    Add(TimetableSlot),
    Delete(String),
    Upload(std::path::PathBuf),
}

pub async fn timetable(client: &ApiClient, action: TimetableAction) -> anyhow::Result<()> {
    match action {
        TimetableAction::List => {}
        TimetableAction::Add(slot) => {
            client
                .create_timetable_slot(&slot)
                .await
                .context("failed to create timetable slot")?;
        }
        TimetableAction::Delete(id) => {
            client
                .delete_timetable_slot(&id)
                .await
                .context("failed to delete timetable slot")?;
        }
        TimetableAction::Upload(path) => {
            client
                .upload_timetable_csv(&path)
                .await
                .with_context(|| format!("failed to upload {}", path.display()))?;
            println!("Uploaded {}.", path.display());
        }
    }

    let (slots, units) = tokio::try_join!(client.timetable(), client.units())
        .context("failed to load timetable")?;
    let directory = Directory::new(&[], &units);
    for slot in slots {
        let unit = directory
            .unit(&slot.unit_id)
            .map(|u| u.name.as_str())
            .unwrap_or(slot.unit_id.as_str());
        println!(
            "{:<10} {}-{}  {:<28} {}",
            slot.day,
            slot.start_time,
            slot.end_time,
            unit,
            slot.room.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn reschedule(
    client: &ApiClient,
    decide: Option<(String, RescheduleStatus)>,
    pending_only: bool,
) -> anyhow::Result<()> {
    if let Some((id, status)) = decide {
        client
            .set_reschedule_status(&id, status)
            .await
            .with_context(|| format!("failed to update reschedule request {id}"))?;
    }

    let requests = client
        .reschedule_requests()
        .await
        .context("failed to load reschedule requests")?;
    for request in requests
        .iter()
        .filter(|r| !pending_only || r.status == RescheduleStatus::Pending)
    {
        println!(
            "- {} {:?} {} {} {} -> {} {}",
            request.id,
            request.status,
            request.unit_name.as_deref().or(request.unit_id.as_deref()).unwrap_or("-"),
            request.original_day.as_deref().unwrap_or(""),
            request.original_time.as_deref().unwrap_or(""),
            request.new_date.as_deref().unwrap_or(""),
            request.new_time.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn reports(
    client: &ApiClient,
    session: &Session,
    student: Option<&str>,
) -> anyhow::Result<()> {
    let id = resolve_user_id(session, student)?;
    let report = client.reports(&id).await.context("failed to load reports")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn chat(client: &ApiClient, message: &str) -> anyhow::Result<()> {
    let reply = client.chat(message).await.context("chatbot request failed")?;
    println!("{}", reply.reply);
    Ok(())
}

pub async fn whoami(client: &ApiClient, session: &mut Session) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        bail!("not signed in: no token in auth storage");
    }
    let user = session.refresh(client).await.context("failed to refresh profile")?;
    println!("{} <{}> ({:?})", user.full_name(), user.email, user.role);
    if user.is_student() {
        println!(
            "Streak {} days, {} of {} classes attended",
            user.streak, user.attended_classes, user.total_classes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn institution(id: &str) -> Institution {
        Institution {
            id: id.into(),
            name: format!("Institution {id}"),
            rewards: vec![],
        }
    }

    #[test]
    fn preferred_institution_wins_over_first() {
        let all = vec![institution("i1"), institution("i2")];
        assert_eq!(pick_institution(&all, Some("i2")).map(|i| i.id.as_str()), Some("i2"));
        assert_eq!(pick_institution(&all, Some("zz")).map(|i| i.id.as_str()), Some("i1"));
        assert_eq!(pick_institution(&all, None).map(|i| i.id.as_str()), Some("i1"));
        assert!(pick_institution(&[], None).is_none());
    }

    #[test]
    fn explicit_user_id_overrides_session() {
        let session = Session::anonymous();
        assert_eq!(resolve_user_id(&session, Some("s1")).unwrap(), "s1");
        assert!(resolve_user_id(&session, None).is_err());
    }

    fn roster() -> serde_json::Value {
        serde_json::json!([
            { "id": "s1", "role": "student", "firstName": "Avery", "department": "Computing" },
            { "id": "s2", "role": "student", "firstName": "Kiara", "department": "Nursing" },
            { "id": "t1", "role": "teacher", "firstName": "Jules", "department": "computing" },
            { "id": "a1", "role": "admin", "firstName": "Root", "department": "Computing" }
        ])
    }

    fn marks() -> serde_json::Value {
        serde_json::json!([
            { "id": "r1", "studentId": "s1", "unitId": "u1",
              "date": "2026-03-02", "status": "present" },
            { "id": "r2", "studentId": "s2", "unitId": "u1",
              "date": "2026-03-02", "status": "absent" },
            { "id": "r3", "studentId": "s1", "unitId": "u1",
              "date": "2026-03-03", "status": "late" }
        ])
    }

    #[test]
    fn department_scope_keeps_its_students_records() {
        let users: Vec<User> = serde_json::from_value(roster()).unwrap();
        let records: Vec<AttendanceRecord> = serde_json::from_value(marks()).unwrap();

        let (users, records) = scope_to_department(users, records, "Computing");

        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "t1"]);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.student_id == "s1"));
    }

    #[tokio::test]
    async fn live_tick_refetches_attendance_and_users() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let users = server
            .mock_async(|when, then| {
                when.method(GET).path("/users");
                then.status(200).json_body(roster());
            })
            .await;
        let units = server
            .mock_async(|when, then| {
                when.method(GET).path("/units");
                then.status(200).json_body(serde_json::json!([
                    { "id": "u1", "name": "Databases", "code": "CS210" }
                ]));
            })
            .await;
        let attendance = server
            .mock_async(|when, then| {
                when.method(GET).path("/attendance");
                then.status(200).json_body(marks());
            })
            .await;

        let config = AppConfig::default().with_api_url(server.base_url());
        let client = ApiClient::new(&config, &Session::anonymous()).unwrap();

        let first = fetch_live_summary(&client).await.unwrap();
        let second = fetch_live_summary(&client).await.unwrap();

        assert_eq!((first.students, first.teachers, first.units), (2, 1, 1));
        assert_eq!((second.records, second.present), (3, 1));
        attendance.assert_hits_async(2).await;
        users.assert_hits_async(2).await;
        units.assert_hits_async(1).await;
    }
}

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;

use chrono::NaiveDate;

use crate::aggregate::{Bucket, DashboardSummary, StudentRate, TrendPoint};
use crate::models::User;

const STUDENT_HEADER: [&str; 10] = [
    "ID",
    "First Name",
    "Last Name",
    "Email",
    "Program",
    "Department",
    "Year",
    "Gender",
    "Status",
    "Attendance %",
];

const LECTURER_HEADER: [&str; 6] = ["ID", "Name", "Email", "Department", "Units", "Status"];

const SUMMARY_HEADER: [&str; 5] = ["Section", "Name", "Total", "Present", "Percentage"];

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

/// Students table as CSV. The header is always written, even for no rows.
pub fn write_students_csv<W: io::Write>(
    out: W,
    students: &[&User],
    rates: &[StudentRate],
) -> Result<(), csv::Error> {
    let rates: HashMap<&str, u32> = rates
        .iter()
        .map(|rate| (rate.student_id.as_str(), rate.percentage))
        .collect();

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(STUDENT_HEADER)?;
    for student in students {
        let year = student.year.map(|y| y.to_string()).unwrap_or_default();
        let rate = rates
            .get(student.id.as_str())
            .map(|p| p.to_string())
            .unwrap_or_default();
        writer.write_record([
            student.id.as_str(),
            student.first_name.as_str(),
            student.last_name.as_str(),
            student.email.as_str(),
            opt(student.program.as_deref()),
            opt(student.department.as_deref()),
            year.as_str(),
            opt(student.gender.as_deref()),
            opt(student.status.as_deref()),
            rate.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_lecturers_csv<W: io::Write>(
    out: W,
    lecturers: &[&User],
    unit_counts: &HashMap<String, usize>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(LECTURER_HEADER)?;
    for lecturer in lecturers {
        let units = unit_counts.get(&lecturer.id).copied().unwrap_or(0).to_string();
        writer.write_record([
            lecturer.id.as_str(),
            lecturer.full_name().as_str(),
            lecturer.email.as_str(),
            opt(lecturer.department.as_deref()),
            units.as_str(),
            opt(lecturer.status.as_deref()),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Dashboard summary followed by any number of labelled breakdowns.
pub fn write_summary_csv<W: io::Write>(
    out: W,
    summary: &DashboardSummary,
    sections: &[(&str, &[Bucket])],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(SUMMARY_HEADER)?;
    writer.write_record([
        "Overall".to_string(),
        "All records".to_string(),
        summary.records.to_string(),
        summary.present.to_string(),
        summary.percentage.to_string(),
    ])?;
    writer.write_record([
        "Overall".to_string(),
        "Today".to_string(),
        summary.today_total.to_string(),
        summary.today_present.to_string(),
        summary.today_percentage.to_string(),
    ])?;
    for (section, buckets) in sections {
        for bucket in buckets.iter() {
            writer.write_record([
                section.to_string(),
                bucket.name.clone(),
                bucket.total.to_string(),
                bucket.present.to_string(),
                bucket.percentage.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub struct ReportInput<'a> {
    pub scope: Option<&'a str>,
    pub generated_on: NaiveDate,
    pub summary: &'a DashboardSummary,
    pub departments: &'a [Bucket],
    pub programs: &'a [Bucket],
    pub years: &'a [Bucket],
    pub at_risk: &'a [StudentRate],
    pub trend: &'a [TrendPoint],
}

fn write_buckets(output: &mut String, title: &str, buckets: &[Bucket]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");
    if buckets.is_empty() {
        let _ = writeln!(output, "No attendance recorded.");
        return;
    }
    for bucket in buckets {
        let _ = writeln!(
            output,
            "- {}: {}% ({} of {} present)",
            bucket.name, bucket.percentage, bucket.present, bucket.total
        );
    }
}

pub fn build_report(input: &ReportInput) -> String {
    let mut output = String::new();
    let scope = input.scope.unwrap_or("all departments");
    let summary = input.summary;

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(output, "Generated for {} on {}", scope, input.generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- {} students, {} lecturers, {} units",
        summary.students, summary.teachers, summary.units
    );
    let _ = writeln!(
        output,
        "- Overall attendance {}% across {} records",
        summary.percentage, summary.records
    );
    let _ = writeln!(
        output,
        "- Today {}% ({} of {} present)",
        summary.today_percentage, summary.today_present, summary.today_total
    );

    write_buckets(&mut output, "By Department", input.departments);
    write_buckets(&mut output, "By Program", input.programs);
    write_buckets(&mut output, "By Year", input.years);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Attendance");
    if input.at_risk.is_empty() {
        let _ = writeln!(output, "No students below the threshold.");
    } else {
        for student in input.at_risk.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) {}% across {} classes",
                student.name, student.email, student.percentage, student.total
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Trend");
    if input.trend.is_empty() {
        let _ = writeln!(output, "No attendance recorded.");
    } else {
        for point in input.trend.iter().rev().take(7) {
            let _ = writeln!(
                output,
                "- {}: {}% ({} of {})",
                point.date, point.percentage, point.present, point.total
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn student(id: &str, last_name: &str) -> User {
        User {
            id: id.into(),
            role: Role::Student,
            first_name: "Wanjiru".into(),
            last_name: last_name.into(),
            email: format!("{id}@uni.ac.ke"),
            gender: Some("Female".into()),
            program: Some("BSc Computer Science, Evening".into()),
            department: None,
            year: Some(3),
            streak: 0,
            selected_units: vec![],
            total_classes: 0,
            attended_classes: 0,
            status: Some("active".into()),
            institution_id: None,
        }
    }

    fn summary() -> DashboardSummary {
        DashboardSummary {
            students: 2,
            teachers: 1,
            units: 3,
            records: 10,
            present: 6,
            percentage: 60,
            today_total: 0,
            today_present: 0,
            today_percentage: 0,
        }
    }

    #[test]
    fn empty_export_is_header_only() {
        let mut buffer = Vec::new();
        write_students_csv(&mut buffer, &[], &[]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "ID,First Name,Last Name,Email,Program,Department,Year,Gender,Status,Attendance %\n"
        );
    }

    #[test]
    fn embedded_commas_and_quotes_are_escaped() {
        let a = student("s1", "O\"Neil");
        let rates = vec![StudentRate {
            student_id: "s1".into(),
            name: a.full_name(),
            email: a.email.clone(),
            total: 4,
            present: 3,
            percentage: 75,
        }];

        let mut buffer = Vec::new();
        write_students_csv(&mut buffer, &[&a], &rates).unwrap();

        let mut reader = csv::Reader::from_reader(buffer.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2], "O\"Neil");
        assert_eq!(&rows[0][4], "BSc Computer Science, Evening");
        assert_eq!(&rows[0][9], "75");
    }

    #[test]
    fn lecturer_export_counts_units() {
        let mut lecturer = student("t1", "Otieno");
        lecturer.role = Role::Teacher;
        let counts = HashMap::from([("t1".to_string(), 2usize)]);

        let mut buffer = Vec::new();
        write_lecturers_csv(&mut buffer, &[&lecturer], &counts).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.ends_with("t1,Wanjiru Otieno,t1@uni.ac.ke,,2,active\n"));
    }

    #[test]
    fn summary_export_includes_sections() {
        let departments = vec![Bucket {
            name: "Computing".into(),
            total: 10,
            present: 6,
            percentage: 60,
        }];
        let mut buffer = Vec::new();
        let sections = [("Department", departments.as_slice())];
        write_summary_csv(&mut buffer, &summary(), &sections).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "Overall,All records,10,6,60");
        assert_eq!(lines[3], "Department,Computing,10,6,60");
    }

    #[test]
    fn report_handles_empty_sections() {
        let summary = summary();
        let report = build_report(&ReportInput {
            scope: None,
            generated_on: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            summary: &summary,
            departments: &[],
            programs: &[],
            years: &[],
            at_risk: &[],
            trend: &[],
        });

        assert!(report
            .starts_with("# Attendance Report\nGenerated for all departments on 2026-03-02"));
        assert!(report.contains("- Overall attendance 60% across 10 records"));
        assert!(report.contains("No students below the threshold."));
    }

    #[test]
    fn report_names_its_department_scope() {
        let summary = summary();
        let report = build_report(&ReportInput {
            scope: Some("Computing"),
            generated_on: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            summary: &summary,
            departments: &[],
            programs: &[],
            years: &[],
            at_risk: &[],
            trend: &[],
        });
        assert!(report.contains("Generated for Computing on 2026-03-02"));
    }
}

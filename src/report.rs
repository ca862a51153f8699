use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

/// Subject rows on the printed report card, in canonical order.
pub const REPORT_SUBJECTS: [&str; 12] = [
    "Mathematics",
    "English",
    "Kiswahili",
    "Chemistry",
    "Physics",
    "Biology",
    "Agriculture",
    "History",
    "Geography",
    "Business",
    "Compter",
    "CRE",
];

/// Departments offered on the mark-entry side. Kept verbatim, including
/// the "Geograpghy" spelling: stored exam records are keyed by the
/// lowercased department name, so renaming an entry orphans its marks.
pub const DEPARTMENTS: [&str; 10] = [
    "Mathematics",
    "English",
    "Kiswahili",
    "Chemistry",
    "Physics",
    "Biology",
    "Agriculture",
    "History",
    "Geograpghy",
    "Cre",
];

/// Report cards cover term 3 only.
// TODO: make the report term selectable once the office confirms whether
// reports should follow the active term instead of a fixed one.
pub const REPORT_TERM: Term = Term::Term3;

pub fn subject_key(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Form1,
    Form2,
    Form3,
    Form4,
}

impl Form {
    pub fn parse(text: &str) -> Option<Form> {
        match text {
            "Form 1" => Some(Form::Form1),
            "Form 2" => Some(Form::Form2),
            "Form 3" => Some(Form::Form3),
            "Form 4" => Some(Form::Form4),
            _ => None,
        }
    }

    pub fn from_digit(digit: u8) -> Option<Form> {
        match digit {
            1 => Some(Form::Form1),
            2 => Some(Form::Form2),
            3 => Some(Form::Form3),
            4 => Some(Form::Form4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Form::Form1 => "Form 1",
            Form::Form2 => "Form 2",
            Form::Form3 => "Form 3",
            Form::Form4 => "Form 4",
        }
    }

    pub fn digit(&self) -> u8 {
        match self {
            Form::Form1 => 1,
            Form::Form2 => 2,
            Form::Form3 => 3,
            Form::Form4 => 4,
        }
    }
}

/// Form digit plus stream letter, e.g. "3B". The finest grouping unit
/// for report generation and timetables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLevel {
    pub form: Form,
    pub stream: char,
}

impl ClassLevel {
    pub fn parse(text: &str) -> Option<ClassLevel> {
        let mut chars = text.chars();
        let digit = chars.next()?.to_digit(10)?;
        let stream = chars.next()?;
        if chars.next().is_some() || !stream.is_ascii_uppercase() {
            return None;
        }
        Some(ClassLevel {
            form: Form::from_digit(digit as u8)?,
            stream,
        })
    }
}

impl std::fmt::Display for ClassLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.form.digit(), self.stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(text: &str) -> Option<Gender> {
        match text {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            "Other" => Some(Gender::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    Term1,
    Term2,
    Term3,
}

impl Term {
    pub fn from_number(n: i64) -> Option<Term> {
        match n {
            1 => Some(Term::Term1),
            2 => Some(Term::Term2),
            3 => Some(Term::Term3),
            _ => None,
        }
    }

    pub fn number(&self) -> i64 {
        match self {
            Term::Term1 => 1,
            Term::Term2 => 2,
            Term::Term3 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Term1 => "Term 1",
            Term::Term2 => "Term 2",
            Term::Term3 => "Term 3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamType {
    Opener,
    Cat1,
    Cat2,
    Cat3,
    Midterm,
    Endterm,
}

impl ExamType {
    pub const ALL: [ExamType; 6] = [
        ExamType::Opener,
        ExamType::Cat1,
        ExamType::Cat2,
        ExamType::Cat3,
        ExamType::Midterm,
        ExamType::Endterm,
    ];

    pub fn parse(text: &str) -> Option<ExamType> {
        match text {
            "Opener" => Some(ExamType::Opener),
            "CAT-1" => Some(ExamType::Cat1),
            "CAT-2" => Some(ExamType::Cat2),
            "CAT-3" => Some(ExamType::Cat3),
            "Midterm" => Some(ExamType::Midterm),
            "Endterm" => Some(ExamType::Endterm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExamType::Opener => "Opener",
            ExamType::Cat1 => "CAT-1",
            ExamType::Cat2 => "CAT-2",
            ExamType::Cat3 => "CAT-3",
            ExamType::Midterm => "Midterm",
            ExamType::Endterm => "Endterm",
        }
    }
}

/// Letter grades in descending order. The variant order matters: it is
/// the rank used to check that grading never improves as marks drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "F")]
    F,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::DPlus => "D+",
            Grade::D => "D",
            Grade::DMinus => "D-",
            Grade::F => "F",
        }
    }
}

/// Inclusive lower bounds, highest match wins. NaN fails every
/// comparison and lands on F, which is the defined behavior for an
/// average that cannot be computed.
pub fn grade(average: f64) -> Grade {
    if average >= 80.0 {
        Grade::A
    } else if average >= 75.0 {
        Grade::AMinus
    } else if average >= 70.0 {
        Grade::BPlus
    } else if average >= 65.0 {
        Grade::B
    } else if average >= 60.0 {
        Grade::BMinus
    } else if average >= 55.0 {
        Grade::CPlus
    } else if average >= 50.0 {
        Grade::C
    } else if average >= 45.0 {
        Grade::CMinus
    } else if average >= 40.0 {
        Grade::DPlus
    } else if average >= 35.0 {
        Grade::D
    } else if average >= 30.0 {
        Grade::DMinus
    } else {
        Grade::F
    }
}

/// Half-up 2-decimal rounding used for every average on the card:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Class-teacher remark banding. Independent of the grade table; the
/// bands run in tens from 90 down to 50.
pub fn overall_comment(overall_average: Option<f64>) -> &'static str {
    let Some(avg) = overall_average else {
        return "Insufficient data to provide a comment.";
    };
    if avg >= 90.0 {
        "Excellent performance! Keep up the outstanding work."
    } else if avg >= 80.0 {
        "Very good performance. Continue to strive for excellence."
    } else if avg >= 70.0 {
        "Good performance. There's room for improvement."
    } else if avg >= 60.0 {
        "Fair performance. More effort is needed to improve."
    } else if avg >= 50.0 {
        "Average performance. Significant improvement is required."
    } else {
        "Below average performance. Urgent attention and hard work are necessary."
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub admission_number: String,
    pub name: String,
    pub form: Form,
    pub class_level: ClassLevel,
    pub guardian_contact: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub photo_path: String,
    pub admitted_at: String,
}

#[derive(Debug, Clone)]
pub struct ExamRecord {
    pub id: String,
    pub subject: String,
    pub admission_number: String,
    pub term: Term,
    pub exam_type: ExamType,
    pub marks: f64,
    pub recorded_at: i64,
    pub form: Form,
    pub class_level: ClassLevel,
}

/// Immutable view of one class's marks for one term, fetched in a single
/// pass by the store adapter and handed to the builder by value. Records
/// are keyed by (subject key, admission number) and kept in
/// (recorded_at, rowid) order.
#[derive(Debug, Clone)]
pub struct MarkSnapshot {
    pub term: Term,
    pub fetched_at: String,
    pub students: Vec<Student>,
    pub records: HashMap<(String, String), Vec<ExamRecord>>,
}

impl MarkSnapshot {
    pub fn records_for(&self, subject_key: &str, admission_number: &str) -> &[ExamRecord] {
        self.records
            .get(&(subject_key.to_string(), admission_number.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject: String,
    pub opener: Option<f64>,
    pub midterm: Option<f64>,
    pub endterm: Option<f64>,
    pub average: Option<f64>,
    pub grade: Option<Grade>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub admission_number: String,
    pub student_name: String,
    pub form: String,
    pub class_level: String,
    pub photo_path: String,
    pub subjects: Vec<SubjectLine>,
    pub overall_average: Option<f64>,
    pub overall_grade: Option<Grade>,
    pub has_results: bool,
    pub teacher_comment: String,
}

/// First record wins when an exam type somehow repeats; callers feed
/// records in (recorded_at, rowid) order, so the pick is stable.
fn slot_marks(records: &[ExamRecord], exam_type: ExamType) -> Option<f64> {
    records
        .iter()
        .find(|r| r.exam_type == exam_type)
        .map(|r| r.marks)
}

/// Collapse one student's records for one subject into a report line.
/// Only the three major exams feed the line; CAT records stay in storage
/// but never appear on the card. A present mark of zero is a real mark.
pub fn aggregate_subject(subject: &str, records: &[ExamRecord]) -> SubjectLine {
    let opener = slot_marks(records, ExamType::Opener);
    let midterm = slot_marks(records, ExamType::Midterm);
    let endterm = slot_marks(records, ExamType::Endterm);

    let present: Vec<f64> = [opener, midterm, endterm]
        .into_iter()
        .flatten()
        .collect();
    let average = if present.is_empty() {
        None
    } else {
        Some(round_off_2_decimals(
            present.iter().sum::<f64>() / present.len() as f64,
        ))
    };

    SubjectLine {
        subject: subject.to_string(),
        opener,
        midterm,
        endterm,
        average,
        grade: average.map(grade),
    }
}

/// Pure projection from snapshot to cards: no I/O, no retained state,
/// output order equals the snapshot's student order.
pub fn build_report_cards(snapshot: &MarkSnapshot) -> Vec<ReportCard> {
    snapshot
        .students
        .iter()
        .map(|student| build_card(snapshot, student))
        .collect()
}

fn build_card(snapshot: &MarkSnapshot, student: &Student) -> ReportCard {
    let mut subjects = Vec::with_capacity(REPORT_SUBJECTS.len());
    for subject in REPORT_SUBJECTS {
        let records = snapshot.records_for(&subject_key(subject), &student.admission_number);
        subjects.push(aggregate_subject(subject, records));
    }

    let numeric: Vec<f64> = subjects.iter().filter_map(|line| line.average).collect();
    let overall_average = if numeric.is_empty() {
        None
    } else {
        Some(round_off_2_decimals(
            numeric.iter().sum::<f64>() / numeric.len() as f64,
        ))
    };

    ReportCard {
        admission_number: student.admission_number.clone(),
        student_name: student.name.clone(),
        form: student.form.as_str().to_string(),
        class_level: student.class_level.to_string(),
        photo_path: student.photo_path.clone(),
        subjects,
        overall_average,
        overall_grade: overall_average.map(grade),
        has_results: overall_average.is_some(),
        teacher_comment: overall_comment(overall_average).to_string(),
    }
}

use chrono::NaiveDateTime;
use serde::Serializer;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.format(DATE_FORMAT).to_string();
    serializer.serialize_str(&s)
}

pub fn serialize_opt_date<S>(
    date: &Option<NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match date {
        Some(date) => serialize_date(date, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Stamped {
        #[serde(serialize_with = "serialize_date")]
        at: NaiveDateTime,
        #[serde(serialize_with = "serialize_opt_date")]
        maybe: Option<NaiveDateTime>,
    }

    #[test]
    fn dates_render_as_utc_millis() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_milli_opt(12, 30, 45, 500))
            .expect("valid date");
        let json = serde_json::to_string(&Stamped { at, maybe: None }).expect("serialize");
        assert_eq!(json, r#"{"at":"2024-03-01T12:30:45.500Z","maybe":null}"#);
    }
}

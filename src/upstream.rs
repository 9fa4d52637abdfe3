//! Parsing of upstream HTTP replies on the relay
//!
//! Failures are reported as the numeric codes the controller shows in its
//! status registers (see [`crate::protocol::status`]).

use serde::Deserialize;

use crate::config;
use crate::protocol::{Weather, status};

/// Documents the relay fetches on the controller's behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Weather,
    Uv,
}

impl Resource {
    pub fn host(self) -> &'static str {
        match self {
            Resource::Weather => config::WEATHER_HOST,
            Resource::Uv => config::UV_HOST,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Resource::Weather => config::WEATHER_PATH,
            Resource::Uv => config::UV_PATH,
        }
    }
}

#[derive(Deserialize)]
struct Observation {
    properties: Option<Properties>,
}

/// The six measurements the controller shows; other keys are skipped
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    temperature: Option<Measurement>,
    dewpoint: Option<Measurement>,
    wind_direction: Option<Measurement>,
    wind_speed: Option<Measurement>,
    wind_gust: Option<Measurement>,
    relative_humidity: Option<Measurement>,
}

#[derive(Deserialize)]
struct Measurement {
    value: Option<f32>,
}

#[derive(Deserialize)]
struct UvRecord {
    #[serde(rename = "UV_INDEX")]
    uv_index: Option<u8>,
}

fn measured(m: Option<Measurement>) -> Result<f32, u16> {
    let m = m.ok_or(status::KEY_MISSING)?;
    Ok(m.value.unwrap_or(0.0))
}

/// Pull the six measurements out of an api.weather.gov observation
///
/// A `null` measurement reads as 0.0. A body that does not decode is
/// `VALUE_INVALID`; a measurement that is absent is `KEY_MISSING`.
pub fn parse_weather(body: &[u8]) -> Result<Weather, u16> {
    let (observation, _) =
        serde_json_core::from_slice::<Observation>(body).map_err(|_| status::VALUE_INVALID)?;
    let p = observation.properties.ok_or(status::KEY_MISSING)?;

    Ok(Weather {
        temperature: measured(p.temperature)?,
        dewpoint: measured(p.dewpoint)?,
        wind_direction: measured(p.wind_direction)?,
        wind_speed: measured(p.wind_speed)?,
        wind_gust: measured(p.wind_gust)?,
        relative_humidity: measured(p.relative_humidity)?,
    })
}

/// UV index of the first record of an Envirofacts daily UV reply
pub fn parse_uv(body: &[u8]) -> Result<u8, u16> {
    let (records, _) = serde_json_core::from_slice::<heapless::Vec<UvRecord, 8>>(body)
        .map_err(|_| status::JSON_INVALID)?;
    records
        .first()
        .and_then(|r| r.uv_index)
        .ok_or(status::FIELD_MISSING)
}

/// Split a redirect `Location` URL into host and path
pub fn split_location(location: &str) -> Result<(&str, &str), u16> {
    let (_, rest) = location
        .split_once("//")
        .ok_or(status::REDIRECT_NO_SCHEME)?;
    let rest = rest.trim_end();
    if rest.is_empty() {
        return Err(status::REDIRECT_EMPTY);
    }
    let slash = rest.find('/').ok_or(status::REDIRECT_NO_PATH)?;
    Ok((&rest[..slash], &rest[slash..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBSERVATION: &str = r#"{
        "id": "https://api.weather.gov/stations/LOAC1/observations/2021-08-06T20:00:00+00:00",
        "properties": {
            "textDescription": "Clear",
            "temperature": { "unitCode": "wmoUnit:degC", "value": 21.5, "qualityControl": "V" },
            "dewpoint": { "unitCode": "wmoUnit:degC", "value": 12.25, "qualityControl": "V" },
            "windDirection": { "unitCode": "wmoUnit:degree_(angle)", "value": 270, "qualityControl": "V" },
            "windSpeed": { "unitCode": "wmoUnit:km_h-1", "value": 14.75, "qualityControl": "V" },
            "windGust": { "unitCode": "wmoUnit:km_h-1", "value": null, "qualityControl": "Z" },
            "barometricPressure": { "unitCode": "wmoUnit:Pa", "value": 101500, "qualityControl": "V" },
            "relativeHumidity": { "unitCode": "wmoUnit:percent", "value": 55.5, "qualityControl": "V" }
        }
    }"#;

    #[test]
    fn weather_observation_values() {
        let w = parse_weather(OBSERVATION.as_bytes()).unwrap();
        assert_eq!(w.temperature, 21.5);
        assert_eq!(w.dewpoint, 12.25);
        assert_eq!(w.wind_direction, 270.0);
        assert_eq!(w.wind_speed, 14.75);
        assert_eq!(w.wind_gust, 0.0);
        assert_eq!(w.relative_humidity, 55.5);
    }

    #[test]
    fn full_observation_document_skips_unused_fields() {
        let body = r#"{
            "@context": ["https://geojson.org/geojson-ld/geojson-context.jsonld", {"@version": "1.1"}],
            "id": "https://api.weather.gov/stations/LOAC1/observations/latest",
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [-118.15, 33.81]},
            "properties": {
                "station": "https://api.weather.gov/stations/LOAC1",
                "textDescription": "Cloudy {overcast}",
                "presentWeather": [],
                "temperature": {"unitCode": "wmoUnit:degC", "value": 19.0, "qualityControl": "V"},
                "dewpoint": {"unitCode": "wmoUnit:degC", "value": 11.5, "qualityControl": "V"},
                "windDirection": {"unitCode": "wmoUnit:degree_(angle)", "value": 180, "qualityControl": "V"},
                "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 9.25, "qualityControl": "V"},
                "windGust": {"unitCode": "wmoUnit:km_h-1", "value": 20.5, "qualityControl": "V"},
                "relativeHumidity": {"unitCode": "wmoUnit:percent", "value": 61.5, "qualityControl": "V"},
                "cloudLayers": [{"base": {"unitCode": "wmoUnit:m", "value": 760}, "amount": "OVC"}]
            }
        }"#;
        let w = parse_weather(body.as_bytes()).unwrap();
        assert_eq!(w.temperature, 19.0);
        assert_eq!(w.wind_direction, 180.0);
        assert_eq!(w.wind_gust, 20.5);
        assert_eq!(w.relative_humidity, 61.5);
    }

    #[test]
    fn missing_weather_key() {
        let body = OBSERVATION.replace("\"windGust\"", "\"gust\"");
        assert_eq!(parse_weather(body.as_bytes()), Err(status::KEY_MISSING));
        assert_eq!(parse_weather(br#"{"id": "x"}"#), Err(status::KEY_MISSING));
    }

    #[test]
    fn similar_key_names_do_not_count() {
        let body = OBSERVATION.replace("\"temperature\"", "\"maxTemperature\"");
        assert_eq!(parse_weather(body.as_bytes()), Err(status::KEY_MISSING));
    }

    #[test]
    fn unparsable_weather_value() {
        let body = OBSERVATION.replace("\"value\": 12.25", "\"value\": \"warm\"");
        assert_eq!(parse_weather(body.as_bytes()), Err(status::VALUE_INVALID));
        let body = OBSERVATION.replace("\"dewpoint\": {", "\"dewpoint\": [");
        assert_eq!(parse_weather(body.as_bytes()), Err(status::VALUE_INVALID));
        assert_eq!(parse_weather(b"<html>"), Err(status::VALUE_INVALID));
    }

    #[test]
    fn uv_index_from_first_record() {
        let body = br#"[{"ZIP_CODE":94043,"UV_INDEX":7,"UV_ALERT":0,"DATE":"AUG/06/2021"}]"#;
        assert_eq!(parse_uv(body), Ok(7));
        assert_eq!(parse_uv(br#"[{"ZIP_CODE":94043,"UV_INDEX":0}]"#), Ok(0));
    }

    #[test]
    fn uv_failures() {
        assert_eq!(parse_uv(b"<html>"), Err(status::JSON_INVALID));
        assert_eq!(parse_uv(b"[]"), Err(status::FIELD_MISSING));
        assert_eq!(parse_uv(br#"[{"ZIP_CODE":94043}]"#), Err(status::FIELD_MISSING));
    }

    #[test]
    fn redirect_locations() {
        assert_eq!(
            split_location("https://api.weather.gov/stations/LOAC1/observations/latest\r"),
            Ok(("api.weather.gov", "/stations/LOAC1/observations/latest"))
        );
        assert_eq!(split_location("/relative/path"), Err(status::REDIRECT_NO_SCHEME));
        assert_eq!(split_location("https://"), Err(status::REDIRECT_EMPTY));
        assert_eq!(split_location("https://example.org"), Err(status::REDIRECT_NO_PATH));
    }

    #[test]
    fn resources_point_at_configured_endpoints() {
        assert_eq!(Resource::Weather.host(), "api.weather.gov");
        assert!(Resource::Uv.path().ends_with("/JSON"));
    }
}

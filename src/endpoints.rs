// REST endpoint table, relative to the environment's base URL

use crate::api_client::{ApiError, HttpMethod};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    // Air search
    InstaFlights,
    TagId,
    FlightsTo,
    LeadPrice,
    DestinationFinder,
    GeoCodeLookup,
    // Air intelligence
    TopDestinations,
    // Air utility
    AllianceLookup,
    EquipmentLookup,
    MultiCityAirportLookup,
    CountriesLookup,
    CityPairs(CityPairsKind),
    AirlineLookup,
    // Hotel
    HotelList,
    HotelContent,
    HotelImage,
    HotelMedia,
    // Cars
    CarAvailability,
    VehicleMedia,
    // Geo utility
    GeoAutocomplete,
    GeoCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CityPairsKind {
    Shop,
    Historical,
    Forecast,
}

impl FromStr for CityPairsKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shop" => Ok(CityPairsKind::Shop),
            "historical" => Ok(CityPairsKind::Historical),
            "forecast" => Ok(CityPairsKind::Forecast),
            other => Err(ApiError::InvalidInput(format!(
                "Invalid endpoint {} specified for city pairs lookup",
                other
            ))),
        }
    }
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::InstaFlights => "/v1/shop/flights",
            Endpoint::TagId => "/v1/shop/flights/tags/",
            Endpoint::FlightsTo => "/v1/shop/flights/cheapest/fares",
            Endpoint::LeadPrice => "/v2/shop/flights/fares",
            Endpoint::DestinationFinder => "/v2/shop/flights/fares",
            Endpoint::GeoCodeLookup => "/v1/lists/utilities/geocode/locations",
            Endpoint::TopDestinations => "/v1/lists/top/destinations",
            Endpoint::AllianceLookup => "/v1/lists/utilities/airlines/alliances/",
            Endpoint::EquipmentLookup => "/v1/lists/utilities/aircraft/equipment/",
            Endpoint::MultiCityAirportLookup => "/v1/lists/supported/cities",
            Endpoint::CountriesLookup => "/v1/lists/supported/countries",
            Endpoint::CityPairs(CityPairsKind::Shop) => {
                "/v1/lists/supported/shop/flights/origins-destinations"
            }
            Endpoint::CityPairs(CityPairsKind::Historical) => {
                "/v1/lists/supported/historical/flights/origins-destinations"
            }
            Endpoint::CityPairs(CityPairsKind::Forecast) => {
                "/v1/lists/supported/forecast/flights/origins-destinations"
            }
            Endpoint::AirlineLookup => "/v1/lists/utilities/airlines/",
            Endpoint::HotelList => "/v1.0.0/shop/hotels",
            Endpoint::HotelContent => "/v1.0.0/shop/hotels/content?mode=content",
            Endpoint::HotelImage => "/v1.0.0/shop/hotels/image?mode=image",
            Endpoint::HotelMedia => "/v1.0.0/shop/hotels/media",
            Endpoint::CarAvailability => "/v2.4.0/shop/cars",
            Endpoint::VehicleMedia => "/v1.0.0/shop/cars/media",
            Endpoint::GeoAutocomplete => "/v1/lists/utilities/geoservices/autocomplete/",
            Endpoint::GeoCode => "/v1/lists/utilities/geocode/locations/",
        }
    }

    pub fn method(&self) -> HttpMethod {
        match self {
            Endpoint::GeoCodeLookup
            | Endpoint::HotelList
            | Endpoint::HotelContent
            | Endpoint::HotelImage
            | Endpoint::HotelMedia
            | Endpoint::CarAvailability
            | Endpoint::VehicleMedia
            | Endpoint::GeoCode => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("shop", CityPairsKind::Shop)]
    #[test_case("historical", CityPairsKind::Historical)]
    #[test_case("forecast", CityPairsKind::Forecast)]
    fn test_city_pairs_kind(raw: &str, expected: CityPairsKind) {
        assert_eq!(raw.parse::<CityPairsKind>().unwrap(), expected);
    }

    #[test]
    fn test_city_pairs_kind_rejects_unknown() {
        let err = "future".parse::<CityPairsKind>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid input: Invalid endpoint future specified for city pairs lookup"
        );
    }

    #[test]
    fn test_methods() {
        assert_eq!(Endpoint::InstaFlights.method(), HttpMethod::Get);
        assert_eq!(Endpoint::GeoCode.method(), HttpMethod::Post);
        assert_eq!(Endpoint::CarAvailability.method(), HttpMethod::Post);
        assert_eq!(
            Endpoint::CityPairs(CityPairsKind::Historical).path(),
            "/v1/lists/supported/historical/flights/origins-destinations"
        );
    }
}

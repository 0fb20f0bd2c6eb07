// Endpoint wrappers
// Each wrapper only assembles parameters; transport and status handling stay in `ApiClient::request`

use crate::api_client::{ApiClient, ApiError, HttpMethod, Payload};
use crate::endpoints::{CityPairsKind, Endpoint};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::debug;

pub type Params = Vec<(String, String)>;

pub const DEFAULT_POINT_OF_SALE: &str = "US";
pub const ALLIANCE_CODES: [&str; 3] = ["*A", "*O", "*S"];

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn join_length_of_stay(days: &[u32]) -> String {
    days.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

// Named options win over anything passed through `other`
fn set_param(params: &mut Params, key: &str, value: impl ToString) {
    let value = value.to_string();
    match params.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => params.push((key.to_string(), value)),
    }
}

fn set_opt<T: ToString>(params: &mut Params, key: &str, value: Option<T>) {
    if let Some(value) = value {
        set_param(params, key, value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeadPriceQuery {
    pub origin: String,
    pub destination: String,
    pub length_of_stay: Vec<u32>,
    pub point_of_sale: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub min_fare: Option<f64>,
    pub max_fare: Option<f64>,
    pub other: Params,
}

impl LeadPriceQuery {
    pub fn new(origin: &str, destination: &str, length_of_stay: Vec<u32>) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            length_of_stay,
            ..Default::default()
        }
    }

    pub fn to_params(&self, point_of_sale: &str) -> Params {
        let mut params = self.other.clone();
        set_param(&mut params, "origin", &self.origin);
        set_param(&mut params, "destination", &self.destination);
        set_param(&mut params, "pointofsalecountry", point_of_sale);
        if !self.length_of_stay.is_empty() {
            set_param(
                &mut params,
                "lengthofstay",
                join_length_of_stay(&self.length_of_stay),
            );
        }
        set_opt(&mut params, "departuredate", self.departure_date.map(format_date));
        set_opt(&mut params, "minfare", self.min_fare);
        set_opt(&mut params, "maxfare", self.max_fare);
        params
    }
}

#[derive(Debug, Clone, Default)]
pub struct DestinationFinderQuery {
    pub origin: String,
    pub destination: Option<String>,
    pub length_of_stay: Vec<u32>,
    pub point_of_sale: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub earliest_departure_date: Option<NaiveDate>,
    pub latest_departure_date: Option<NaiveDate>,
    pub min_fare: Option<f64>,
    pub max_fare: Option<f64>,
    pub region: Option<String>,
    pub theme: Option<String>,
    pub location: Option<String>,
    pub cost_per_mile: Option<f64>,
    pub other: Params,
}

impl DestinationFinderQuery {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            ..Default::default()
        }
    }

    pub fn to_params(&self, point_of_sale: &str) -> Params {
        let mut params = self.other.clone();
        set_param(&mut params, "origin", &self.origin);
        set_param(&mut params, "pointofsalecountry", point_of_sale);
        set_opt(&mut params, "destination", self.destination.as_ref());
        if !self.length_of_stay.is_empty() {
            set_param(
                &mut params,
                "lengthofstay",
                join_length_of_stay(&self.length_of_stay),
            );
        }
        set_opt(&mut params, "departuredate", self.departure_date.map(format_date));
        set_opt(&mut params, "returndate", self.return_date.map(format_date));
        set_opt(
            &mut params,
            "earliestdeparturedate",
            self.earliest_departure_date.map(format_date),
        );
        set_opt(
            &mut params,
            "latestdeparturedate",
            self.latest_departure_date.map(format_date),
        );
        set_opt(&mut params, "minfare", self.min_fare);
        set_opt(&mut params, "maxfare", self.max_fare);
        set_opt(&mut params, "region", self.region.as_ref());
        set_opt(&mut params, "theme", self.theme.as_ref());
        set_opt(&mut params, "location", self.location.as_ref());
        set_opt(&mut params, "pricepermile", self.cost_per_mile);
        params
    }
}

#[derive(Debug, Clone)]
pub struct TopDestinationsQuery {
    // Two letters are a country, three are a city
    pub origin: String,
    pub destination_type: Option<String>,
    pub theme: Option<String>,
    pub num_results: Option<u32>,
    pub destination_country: Option<String>,
    pub region: Option<String>,
    pub weeks: Option<u32>,
}

impl TopDestinationsQuery {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination_type: None,
            theme: None,
            num_results: Some(20),
            destination_country: None,
            region: None,
            weeks: Some(2),
        }
    }

    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        if self.origin.chars().count() == 2 {
            set_param(&mut params, "origincountry", &self.origin);
        } else {
            set_param(&mut params, "origin", &self.origin);
        }
        set_opt(&mut params, "destinationtype", self.destination_type.as_ref());
        set_opt(&mut params, "theme", self.theme.as_ref());
        set_opt(&mut params, "topdestinations", self.num_results);
        set_opt(
            &mut params,
            "destinationcountry",
            self.destination_country.as_ref(),
        );
        set_opt(&mut params, "region", self.region.as_ref());
        set_opt(&mut params, "lookbackweeks", self.weeks);
        params
    }
}

#[derive(Debug, Clone, Default)]
pub struct CityPairsQuery {
    pub point_of_sale: Option<String>,
    pub origin_country: Option<String>,
    pub destination_country: Option<String>,
    pub origin_region: Option<String>,
    pub destination_region: Option<String>,
}

impl CityPairsQuery {
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        set_opt(&mut params, "pointofsalecountry", self.point_of_sale.as_ref());
        set_opt(&mut params, "origincountry", self.origin_country.as_ref());
        set_opt(
            &mut params,
            "destinationcountry",
            self.destination_country.as_ref(),
        );
        set_opt(&mut params, "originregion", self.origin_region.as_ref());
        set_opt(
            &mut params,
            "destinationregion",
            self.destination_region.as_ref(),
        );
        params
    }
}

pub fn geocode_by_id_body(code: &str) -> Value {
    json!([{
        "GeoCodeRQ": {
            "PlaceById": {
                "Id": code,
                "BrowseCategory": { "name": "AIR" }
            }
        }
    }])
}

pub fn country_from_geocode(response: &Value) -> Option<String> {
    response
        .pointer("/Results/0/GeoCodeRS/Place/0/Country")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn aircraft_name(response: &Value) -> Option<String> {
    response
        .pointer("/AircraftInfo/0/AircraftName")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl ApiClient {
    async fn get(&self, path: &str, params: Params) -> Result<Value, ApiError> {
        let payload = if params.is_empty() {
            Payload::None
        } else {
            Payload::Query(params)
        };
        self.request(HttpMethod::Get, path, payload, &[]).await
    }

    async fn send_json(&self, endpoint: Endpoint, body: Value) -> Result<Value, ApiError> {
        self.request(endpoint.method(), endpoint.path(), Payload::Json(body), &[])
            .await
    }

    // Explicit point of sale, else the origin's country, else US
    async fn resolve_point_of_sale(&self, explicit: Option<&str>, origin: &str) -> String {
        if let Some(pos) = explicit {
            return pos.to_string();
        }
        match self.country_code_lookup(origin).await {
            Some(country) => country,
            None => DEFAULT_POINT_OF_SALE.to_string(),
        }
    }

    pub async fn instaflights(&self, options: Params) -> Result<Value, ApiError> {
        self.get(Endpoint::InstaFlights.path(), options).await
    }

    // Tags come back on itineraries searched with enabletagging=true
    pub async fn tag_id(&self, tag_id: &str) -> Result<Value, ApiError> {
        let path = format!("{}{}", Endpoint::TagId.path(), tag_id);
        self.get(&path, Params::new()).await
    }

    pub async fn flights_to(
        &self,
        city_code: &str,
        point_of_sale: Option<&str>,
    ) -> Result<Value, ApiError> {
        let path = format!("{}/{}", Endpoint::FlightsTo.path(), city_code);
        let mut params = Params::new();
        set_opt(&mut params, "pointofsalecountry", point_of_sale);
        self.get(&path, params).await
    }

    pub async fn lead_price(&self, query: &LeadPriceQuery) -> Result<Value, ApiError> {
        let pos = self
            .resolve_point_of_sale(query.point_of_sale.as_deref(), &query.origin)
            .await;
        self.lead_price_opts(query.to_params(&pos)).await
    }

    pub async fn lead_price_opts(&self, options: Params) -> Result<Value, ApiError> {
        self.get(Endpoint::LeadPrice.path(), options).await
    }

    pub async fn destination_finder(
        &self,
        query: &DestinationFinderQuery,
    ) -> Result<Value, ApiError> {
        let pos = self
            .resolve_point_of_sale(query.point_of_sale.as_deref(), &query.origin)
            .await;
        self.destination_finder_opts(query.to_params(&pos)).await
    }

    pub async fn destination_finder_opts(&self, options: Params) -> Result<Value, ApiError> {
        self.get(Endpoint::DestinationFinder.path(), options).await
    }

    pub async fn top_destinations(&self, query: &TopDestinationsQuery) -> Result<Value, ApiError> {
        self.top_destinations_opts(query.to_params()).await
    }

    pub async fn top_destinations_opts(&self, options: Params) -> Result<Value, ApiError> {
        self.get(Endpoint::TopDestinations.path(), options).await
    }

    // Country code for an airport or city code. Any failure reads as "unknown".
    pub async fn country_code_lookup(&self, code: &str) -> Option<String> {
        match self
            .send_json(Endpoint::GeoCodeLookup, geocode_by_id_body(code))
            .await
        {
            Ok(response) => country_from_geocode(&response),
            Err(e) => {
                debug!(code, error = %e, "country code lookup failed");
                None
            }
        }
    }

    pub async fn alliance_lookup(&self, alliance_code: &str) -> Result<Option<Value>, ApiError> {
        if !ALLIANCE_CODES.contains(&alliance_code) {
            return Ok(None);
        }
        let params = vec![("alliancecode".to_string(), alliance_code.to_string())];
        self.get(Endpoint::AllianceLookup.path(), params)
            .await
            .map(Some)
    }

    pub async fn equipment_lookup(&self, aircraft_code: &str) -> Result<Option<String>, ApiError> {
        let params = vec![("aircraftcode".to_string(), aircraft_code.to_string())];
        let response = self.get(Endpoint::EquipmentLookup.path(), params).await?;
        Ok(aircraft_name(&response))
    }

    pub async fn multi_city_airport_lookup(
        &self,
        country_code: &str,
    ) -> Result<Option<Value>, ApiError> {
        let params = vec![("country".to_string(), country_code.to_string())];
        let response = self
            .get(Endpoint::MultiCityAirportLookup.path(), params)
            .await?;
        Ok(response.get("Cities").cloned())
    }

    pub async fn countries_lookup(&self, point_of_sale: &str) -> Result<Value, ApiError> {
        let params = vec![(
            "pointofsalecountry".to_string(),
            point_of_sale.to_string(),
        )];
        self.get(Endpoint::CountriesLookup.path(), params).await
    }

    pub async fn city_pairs_lookup(
        &self,
        endpoint: &str,
        query: &CityPairsQuery,
    ) -> Result<Value, ApiError> {
        self.city_pairs_lookup_opts(endpoint, query.to_params())
            .await
    }

    pub async fn city_pairs_lookup_opts(
        &self,
        endpoint: &str,
        options: Params,
    ) -> Result<Value, ApiError> {
        let kind: CityPairsKind = endpoint.parse()?;
        self.get(Endpoint::CityPairs(kind).path(), options).await
    }

    pub async fn hotel_list(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::HotelList, options).await
    }

    pub async fn hotel_content(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::HotelContent, options).await
    }

    pub async fn hotel_image(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::HotelImage, options).await
    }

    pub async fn hotel_media(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::HotelMedia, options).await
    }

    pub async fn car_availability(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::CarAvailability, options).await
    }

    pub async fn vehicle_media(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::VehicleMedia, options).await
    }

    pub async fn geo_autocomplete(&self, options: Params) -> Result<Value, ApiError> {
        self.get(Endpoint::GeoAutocomplete.path(), options).await
    }

    pub async fn geocode(&self, options: Value) -> Result<Value, ApiError> {
        self.send_json(Endpoint::GeoCode, options).await
    }

    // Accepts a comma separated list, e.g. "AC,A2,A9"
    pub async fn airline_lookup(&self, airline_code: &str) -> Result<Value, ApiError> {
        let params = vec![("airlinecode".to_string(), airline_code.to_string())];
        self.get(Endpoint::AirlineLookup.path(), params).await
    }
}

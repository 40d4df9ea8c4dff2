use crate::error::{ApiError, BookingError};

pub fn validate_weeks(value: u8) -> Result<u8, ApiError> {
    if (1..=6).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::BadRequest("weeks must be between 1 and 6".into()))
    }
}

pub fn validate_name(field: &str, value: &str) -> Result<(), BookingError> {
    if value.trim().is_empty() {
        return Err(BookingError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<(), BookingError> {
    let valid = value
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
    if !valid {
        return Err(BookingError::Validation(format!("invalid email address: {value}")));
    }
    Ok(())
}

pub fn validate_duration(duration_min: u32) -> Result<(), BookingError> {
    if duration_min == 0 {
        return Err(BookingError::Validation(
            "duration_min must be greater than 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_capacity(max_participants: u32) -> Result<(), BookingError> {
    if max_participants == 0 {
        return Err(BookingError::Validation(
            "max_participants must be greater than 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_price(price: f64) -> Result<(), BookingError> {
    if !price.is_finite() || price < 0.0 {
        return Err(BookingError::Validation(
            "price must be a non-negative amount".into(),
        ));
    }
    Ok(())
}

use poem_openapi::Object;

#[derive(Object, Debug)]
pub struct CreateMessageRequestDto {
    #[oai(validator(min_length = 1, max_length = 32))]
    pub phone_number: String,
    #[oai(validator(min_length = 1))]
    pub content: String,
}

// Code generated by sql-typegen. Do not edit.
#![allow(dead_code)]

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Id {
    #[serde(rename = "id")]
    pub id: String,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewPerson {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "id")]
    pub id: String,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewPet {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewPetsPets {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewPets {
    #[serde(rename = "pets")]
    pub pets: Vec<NewPetsPets>,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PersonPets {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Person {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "pets")]
    pub pets: Option<Vec<PersonPets>>,
}
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Pet {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
}
#[derive(Debug)]
pub struct InsertPersonRow {
    pub id: String,
}
#[derive(Debug)]
pub struct ListPeopleRow {
    pub id: String,
    pub first_name: String,
    pub pets: Option<serde_json::Value>,
}
pub struct Queries<'a> {
    client: &'a tokio_postgres::Client,
}
impl<'a> Queries<'a> {
    pub fn new(client: &'a tokio_postgres::Client) -> Self {
        Self { client }
    }
    pub async fn insert_person(
        &self,
        input: &NewPerson,
    ) -> Result<Vec<InsertPersonRow>, tokio_postgres::Error> {
        let rows = self
            .client
            .query(
                "-- :name InsertPerson :in api.NewPerson :out api.Id\nINSERT INTO person (id, first_name)\nVALUES ($1, $2)\nRETURNING id",
                &[&input.id, &input.first_name],
            )
            .await?;
        Ok(rows.iter().map(|row| InsertPersonRow { id: row.get(0) }).collect())
    }
    pub async fn insert_pets(&self, input: &NewPets) -> Result<u64, tokio_postgres::Error> {
        self.client
            .execute(
                "-- :name InsertPets :in api.NewPets\nINSERT INTO pets (id, owner_id, name)\nSELECT r.id, r.owner_id, r.name\nFROM jsonb_to_recordset($1) AS r (id text, owner_id text, name text)",
                &[
                    &serde_json::to_value(&input.pets).expect("failed to serialize query input"),
                ],
            )
            .await
    }
    pub async fn list_people(&self) -> Result<Vec<ListPeopleRow>, tokio_postgres::Error> {
        let rows = self
            .client
            .query(
                "-- :name ListPeople :out api.Person\nSELECT\n    person.id,\n    person.first_name,\n    (SELECT json_agg(pets) FROM pets WHERE pets.owner_id = person.id) AS pets\nFROM person",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ListPeopleRow {
                id: row.get(0),
                first_name: row.get(1),
                pets: row.get(2),
            })
            .collect())
    }
}

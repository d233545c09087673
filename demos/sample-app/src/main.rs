//! Demo app for sql-typegen.
//!
//! The module in `src/db/queries.rs` is generated from the migrations,
//! query files and OpenAPI models in this directory:
//!
//! ```sh
//! sql-typegen --dir demos/sample-app
//! ```
//!
//! Running the binary needs a postgres database with the migrations applied.

mod db;

use db::queries::{NewPerson, NewPets, NewPetsPets, Pet, Queries};
use tokio_postgres::NoTls;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let conn_string = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "host=localhost dbname=sql_typegen_sample".into());

    let (client, connection) = tokio_postgres::connect(&conn_string, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {e}");
        }
    });

    let queries = Queries::new(&client);

    let inserted = queries
        .insert_person(&NewPerson {
            id: "person-1".into(),
            first_name: "Maija".into(),
        })
        .await?;
    println!("inserted person {}", inserted[0].id);

    let pet_count = queries
        .insert_pets(&NewPets {
            pets: vec![
                NewPetsPets {
                    id: "pet-1".into(),
                    owner_id: "person-1".into(),
                    name: "Musti".into(),
                },
                NewPetsPets {
                    id: "pet-2".into(),
                    owner_id: "person-1".into(),
                    name: "Mirri".into(),
                },
            ],
        })
        .await?;
    println!("inserted {pet_count} pets");

    for person in queries.list_people().await? {
        let pets: Vec<Pet> = match person.pets {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        println!(
            "{} {} has {} pets",
            person.id,
            person.first_name,
            pets.len()
        );
    }

    Ok(())
}
